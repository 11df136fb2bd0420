use super::{RegisterSpec, RegisterType, Result, SunspecError, Value};
use log::warn;

fn to_bytes(words: &[u16]) -> Vec<u8> {
    words.iter().flat_map(|w| w.to_be_bytes()).collect()
}

fn word(words: &[u16], name: &str, count: usize) -> Result<u32> {
    if words.len() < count {
        return Err(SunspecError::Config(format!(
            "{name} needs {count} registers, got {}",
            words.len()
        )));
    }

    Ok(words[..count].iter().fold(0u32, |acc, &w| (acc << 16) | w as u32))
}

/// Renders a bitfield as space separated nibbles, e.g. `0000 0000 0000 0011`.
pub fn to_bitfield(num: u32, bits: usize) -> String {
    let digits = format!("{:0width$b}", num, width = bits);

    digits
        .as_bytes()
        .chunks(4)
        .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Applies `value × 10^exp`, dividing for negative exponents to keep decimal results exact.
pub fn apply_scale(value: f64, exp: i16) -> f64 {
    if exp < 0 {
        value / 10f64.powi(-(exp as i32))
    } else {
        value * 10f64.powi(exp as i32)
    }
}

pub fn decode_scale(words: &[u16]) -> Result<i16> {
    Ok(word(words, "scale factor", 1)? as u16 as i16)
}

/// Decodes the registers of `spec` and applies `scale_exp` (value × 10^exp) to numeric results.
pub fn decode(spec: &RegisterSpec, words: &[u16], scale_exp: Option<i16>) -> Result<Value> {
    let name = spec.name;

    let value = match spec.kind {
        RegisterType::Uint16 | RegisterType::Count => Value::Number(word(words, name, 1)? as f64),
        RegisterType::Int16 | RegisterType::ScaleFactor => Value::Number(word(words, name, 1)? as u16 as i16 as f64),
        RegisterType::Accumulator32 => Value::Number(word(words, name, 2)? as f64),
        RegisterType::Float32 => Value::Number(f32::from_bits(word(words, name, 2)?) as f64),
        RegisterType::Bitfield16 => Value::Text(to_bitfield(word(words, name, 1)?, 16)),
        RegisterType::Bitfield32 => Value::Text(to_bitfield(word(words, name, 2)?, 32)),
        RegisterType::String => {
            let bytes = to_bytes(words);
            let text = String::from_utf8_lossy(&bytes);

            Value::Text(text.trim_end_matches(|c: char| c.is_whitespace() || c == '\0').to_owned())
        },
        RegisterType::Enum16 => {
            let index = word(words, name, 1)? as u16;

            match spec.enum_map {
                None => {
                    warn!("{name} Missing enumMap for enum16");
                    Value::Number(index as f64)
                },
                Some(enum_map) => match enum_map.iter().find(|(raw, _)| *raw == index) {
                    Some((_, label)) => Value::Text((*label).to_owned()),
                    None => {
                        warn!("{name} Missing enumMap[{index}] for enum16");
                        Value::Number(index as f64)
                    },
                },
            }
        },
    };

    Ok(match (value, scale_exp) {
        (Value::Number(n), Some(exp)) if exp != 0 => Value::Number(apply_scale(n, exp)),
        (value, _) => value,
    })
}

/// Turns a human value into raw register words, undoing the scale factor.
pub fn encode(spec: &RegisterSpec, value: f64, scale_exp: Option<i16>) -> Result<Vec<u16>> {
    let raw = apply_scale(value, -scale_exp.unwrap_or(0)).round();

    let out_of_range = || {
        SunspecError::Config(format!(
            "{value} does not fit {} ({:?})",
            spec.name, spec.kind
        ))
    };

    match spec.kind {
        RegisterType::Int16 | RegisterType::ScaleFactor => {
            if raw < i16::MIN as f64 || raw > i16::MAX as f64 {
                return Err(out_of_range());
            }
            Ok(vec![raw as i16 as u16])
        },
        RegisterType::Uint16 | RegisterType::Count | RegisterType::Enum16 | RegisterType::Bitfield16 => {
            if raw < 0.0 || raw > u16::MAX as f64 {
                return Err(out_of_range());
            }
            Ok(vec![raw as u16])
        },
        RegisterType::Accumulator32 | RegisterType::Bitfield32 => {
            if raw < 0.0 || raw > u32::MAX as f64 {
                return Err(out_of_range());
            }
            let raw = raw as u32;
            Ok(vec![(raw >> 16) as u16, raw as u16])
        },
        RegisterType::Float32 => {
            let bits = (value as f32).to_bits();
            Ok(vec![(bits >> 16) as u16, bits as u16])
        },
        RegisterType::String => Err(SunspecError::Config(format!("{} is a string register", spec.name))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sunspec::RegisterType::*;

    const STATES: &[(u16, &str)] = &[(1, "OFF"), (4, "CHARGING")];

    #[test]
    fn integers_are_big_endian() {
        let acc = RegisterSpec::new("WH", 1, 2, Accumulator32);
        assert_eq!(decode(&acc, &[0x0001, 0x0002], None), Ok(Value::Number(65538.0)));

        let int = RegisterSpec::new("W", 1, 1, Int16);
        assert_eq!(decode(&int, &[0xFFFE], None), Ok(Value::Number(-2.0)));

        let uint = RegisterSpec::new("A", 1, 1, Uint16);
        assert_eq!(decode(&uint, &[0xFFFE], None), Ok(Value::Number(65534.0)));
    }

    #[test]
    fn float32() {
        let spec = RegisterSpec::new("W", 1, 2, Float32);
        let bits = (-1234.5f32).to_bits();

        assert_eq!(
            decode(&spec, &[(bits >> 16) as u16, bits as u16], None),
            Ok(Value::Number(-1234.5))
        );
    }

    #[test]
    fn string_is_right_trimmed() {
        let spec = RegisterSpec::new("Mn", 1, 4, String);
        let words = [0x4672, 0x6f6e, 0x6975, 0x7300];

        assert_eq!(decode(&spec, &words, None), Ok(Value::Text("Fronius".to_owned())));

        let padded = [0x5375, 0x6e53, 0x2020, 0x0000];
        assert_eq!(decode(&spec, &padded, None), Ok(Value::Text("SunS".to_owned())));
    }

    #[test]
    fn bitfields_render_as_nibbles() {
        let spec = RegisterSpec::new("StorCtl_Mod", 1, 1, Bitfield16);
        assert_eq!(decode(&spec, &[3], None), Ok(Value::Text("0000 0000 0000 0011".to_owned())));

        assert_eq!(to_bitfield(0x8000_0001, 32), "1000 0000 0000 0000 0000 0000 0000 0001");
    }

    #[test]
    fn enum_falls_back_to_raw_value() {
        let spec = RegisterSpec::new("ChaSt", 1, 1, Enum16).enums(STATES);

        assert_eq!(decode(&spec, &[4], None), Ok(Value::Text("CHARGING".to_owned())));
        assert_eq!(decode(&spec, &[9], None), Ok(Value::Number(9.0)));

        let unmapped = RegisterSpec::new("St", 1, 1, Enum16);
        assert_eq!(decode(&unmapped, &[4], None), Ok(Value::Number(4.0)));
    }

    #[test]
    fn scale_factor_applies_exponent() {
        let spec = RegisterSpec::new("InWRte", 1, 1, Int16);

        assert_eq!(decode(&spec, &[5000], Some(-2)), Ok(Value::Number(50.0)));
        assert_eq!(decode(&spec, &[12], Some(2)), Ok(Value::Number(1200.0)));
        assert_eq!(decode_scale(&[0xFFFE]), Ok(-2));
    }

    #[test]
    fn encode_undoes_scale() {
        let spec = RegisterSpec::new("OutWRte", 1, 1, Int16);

        assert_eq!(encode(&spec, -80.0, Some(-2)), Ok(vec![(-8000i16) as u16]));
        assert_eq!(encode(&spec, 100.0, Some(-2)), Ok(vec![10000]));
        assert!(encode(&spec, 400.0, Some(-2)).is_err());

        let acc = RegisterSpec::new("WH", 1, 2, Accumulator32);
        assert_eq!(encode(&acc, 65538.0, None), Ok(vec![1, 2]));
    }

    #[test]
    fn short_buffers_are_rejected() {
        let spec = RegisterSpec::new("WH", 1, 2, Accumulator32);
        assert!(decode(&spec, &[1], None).is_err());
    }
}
