use crate::error::{Result, TsError};

/// Marker returned by option setters for a value they cannot accept.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InvalidValue;

pub type ApplyFn<T> = fn(&mut T, &str) -> core::result::Result<(), InvalidValue>;

/// One recognized `key=value` parameter of a stage.
pub struct OptionSpec<T> {
    pub name: &'static str,
    pub apply: ApplyFn<T>,
}

impl<T> OptionSpec<T> {
    pub const fn new(name: &'static str, apply: ApplyFn<T>) -> Self {
        Self { name, apply }
    }
}

/// Applies a whitespace-separated parameter string to `target`.
///
/// Names match case-insensitively. A token without `=` passes an empty value,
/// which flag options accept.
pub fn apply_options<T>(
    stage: &'static str,
    target: &mut T,
    table: &[OptionSpec<T>],
    params: &str,
) -> Result<()> {
    for token in params.split_whitespace() {
        let (key, value) = token.split_once('=').unwrap_or((token, ""));
        let Some(spec) = table
            .iter()
            .find(|spec| spec.name.eq_ignore_ascii_case(key))
        else {
            return Err(TsError::UnknownOption {
                stage,
                option: key.to_string(),
            });
        };
        (spec.apply)(target, value).map_err(|InvalidValue| TsError::InvalidOption {
            stage,
            option: spec.name.to_string(),
            value: value.to_string(),
        })?;
        log::trace!("stage '{stage}': {}={value}", spec.name);
    }
    Ok(())
}

/// Parses a decimal or `0x`-prefixed hexadecimal integer, optionally signed.
pub fn parse_int(value: &str) -> core::result::Result<i64, InvalidValue> {
    let value = value.trim();
    let (negative, digits) = match value.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, value.strip_prefix('+').unwrap_or(value)),
    };
    let magnitude = match digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
    {
        Some(hex) => i64::from_str_radix(hex, 16),
        None => digits.parse::<i64>(),
    }
    .map_err(|_| InvalidValue)?;
    Ok(if negative { -magnitude } else { magnitude })
}

pub fn parse_i32(value: &str) -> core::result::Result<i32, InvalidValue> {
    i32::try_from(parse_int(value)?).map_err(|_| InvalidValue)
}

pub fn parse_u32(value: &str) -> core::result::Result<u32, InvalidValue> {
    u32::try_from(parse_int(value)?).map_err(|_| InvalidValue)
}

pub fn parse_usize(value: &str) -> core::result::Result<usize, InvalidValue> {
    usize::try_from(parse_int(value)?).map_err(|_| InvalidValue)
}

/// Flag options: bare name or a nonzero value turns them on.
pub fn parse_flag(value: &str) -> core::result::Result<bool, InvalidValue> {
    if value.trim().is_empty() {
        return Ok(true);
    }
    Ok(parse_int(value)? != 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Params {
        depth: usize,
        swap: bool,
    }

    const TABLE: &[OptionSpec<Params>] = &[
        OptionSpec::new("depth", |p, v| {
            p.depth = parse_usize(v)?;
            Ok(())
        }),
        OptionSpec::new("xyswap", |p, v| {
            p.swap = parse_flag(v)?;
            Ok(())
        }),
    ];

    #[test]
    fn parses_case_insensitive_keys_and_hex_values() {
        let mut params = Params::default();
        apply_options("test", &mut params, TABLE, "  DEPTH=0x10\txyswap ").unwrap();
        assert_eq!(params.depth, 16);
        assert!(params.swap);
    }

    #[test]
    fn unknown_key_is_rejected() {
        let mut params = Params::default();
        let err = apply_options("test", &mut params, TABLE, "depth=3 bogus=1").unwrap_err();
        assert!(matches!(err, TsError::UnknownOption { option, .. } if option == "bogus"));
    }

    #[test]
    fn malformed_value_is_rejected() {
        let mut params = Params::default();
        let err = apply_options("test", &mut params, TABLE, "depth=-3").unwrap_err();
        assert!(matches!(err, TsError::InvalidOption { value, .. } if value == "-3"));
    }

    #[test]
    fn signed_values_parse() {
        assert_eq!(parse_int("-0x20"), Ok(-32));
        assert_eq!(parse_int("+7"), Ok(7));
        assert_eq!(parse_int("seven"), Err(InvalidValue));
    }
}
