use super::{
    decode::{decode, decode_scale, encode},
    find_scale, find_spec,
    transport::{DeviceConnection, ModbusTcp, Transport},
    validate_map, Address, RegisterSpec, RegisterType, Result, SunspecError, Value, MAX_READ_REGISTERS,
};
use log::debug;
use std::collections::HashMap;

/// Contiguous register range covering several specs, 1-based and inclusive.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
struct Span {
    start: Address,
    end: Address,
}

impl Span {
    fn covering<'a>(specs: impl IntoIterator<Item = &'a RegisterSpec>) -> Result<Self> {
        let mut span: Option<Span> = None;

        for spec in specs {
            span = Some(match span {
                None => Span {
                    start: spec.start,
                    end: spec.end,
                },
                Some(s) => Span {
                    start: s.start.min(spec.start),
                    end: s.end.max(spec.end),
                },
            });
        }

        let span = span.ok_or_else(|| SunspecError::Config("No registers requested".to_owned()))?;

        if span.len() > MAX_READ_REGISTERS {
            return Err(SunspecError::Config(format!(
                "Read of {}..={} spans {} registers, more than {MAX_READ_REGISTERS}",
                span.start,
                span.end,
                span.len()
            )));
        }

        Ok(span)
    }

    fn len(&self) -> u16 {
        self.end - self.start + 1
    }

    fn slice<'w>(&self, words: &'w [u16], spec: &RegisterSpec) -> Result<&'w [u16]> {
        let offset = (spec.start - self.start) as usize;

        words.get(offset..offset + spec.len() as usize).ok_or_else(|| {
            SunspecError::Connection(format!("Short read for {}: got {} registers", spec.name, words.len()))
        })
    }
}

fn check_expect(spec: &RegisterSpec, value: &Value) -> Result<()> {
    match spec.expect {
        Some(expect) if !expect.matches(value) => Err(SunspecError::RegisterMismatch {
            name: spec.name.to_owned(),
            expected: expect.to_string(),
            received: value.to_string(),
        }),
        _ => Ok(()),
    }
}

/// Named access to one device's register map. The caller owns the connection
/// lifecycle: after a connection error, close and reopen.
pub struct SunspecClient<T: Transport = ModbusTcp> {
    conn: DeviceConnection,
    map: &'static [RegisterSpec],
    transport: Option<T>,
}

impl<T: Transport> SunspecClient<T> {
    pub fn new(conn: DeviceConnection, map: &'static [RegisterSpec]) -> Self {
        Self {
            conn,
            map,
            transport: None,
        }
    }

    #[cfg(test)]
    pub fn with_transport(map: &'static [RegisterSpec], transport: T) -> Self {
        Self {
            conn: DeviceConnection {
                host: "127.0.0.1".to_owned(),
                port: 502,
                unit_id: 1,
                timeout: std::time::Duration::from_secs(1),
            },
            map,
            transport: Some(transport),
        }
    }

    #[cfg(test)]
    pub fn transport_mut(&mut self) -> Option<&mut T> {
        self.transport.as_mut()
    }

    pub fn is_open(&self) -> bool {
        self.transport.is_some()
    }

    pub fn validate(&self) -> Result<()> {
        validate_map(self.map)
    }

    pub async fn open(&mut self) -> Result<()> {
        if self.transport.is_none() {
            debug!("Opening {}:{} unit {}", self.conn.host, self.conn.port, self.conn.unit_id);
            self.transport = Some(T::connect(&self.conn).await?);
        }
        Ok(())
    }

    pub fn close(&mut self) {
        if self.transport.take().is_some() {
            debug!("Closed {}:{} unit {}", self.conn.host, self.conn.port, self.conn.unit_id);
        }
    }

    fn transport(&mut self) -> Result<&mut T> {
        self.transport
            .as_mut()
            .ok_or_else(|| SunspecError::Connection("Port Not Open".to_owned()))
    }

    async fn read_span(&mut self, span: Span) -> Result<Vec<u16>> {
        self.transport()?.read_holding(span.start - 1, span.len()).await
    }

    fn decode_from(&self, spec: &RegisterSpec, span: Span, words: &[u16]) -> Result<Value> {
        let scale_exp = match find_scale(self.map, spec)? {
            Some(scale_spec) => Some(decode_scale(span.slice(words, scale_spec)?)?),
            None => None,
        };

        let value = decode(spec, span.slice(words, spec)?, scale_exp)?;
        check_expect(spec, &value)?;

        Ok(value)
    }

    /// Reads one register together with its scale factor in a single request.
    pub async fn read_register(&mut self, name: &str) -> Result<Value> {
        let spec = find_spec(self.map, name)?;
        let scale_spec = find_scale(self.map, spec)?;

        let span = Span::covering(std::iter::once(spec).chain(scale_spec))?;
        let words = self.read_span(span).await?;

        self.decode_from(spec, span, &words)
    }

    /// Reads all requested registers and their scale factors with one request.
    /// Scale factor registers are not part of the result.
    pub async fn read_registers(&mut self, names: &[&str]) -> Result<HashMap<&'static str, Value>> {
        let mut specs = Vec::with_capacity(names.len() * 2);

        for name in names {
            let spec = find_spec(self.map, name)?;
            specs.push(spec);

            if let Some(scale_spec) = find_scale(self.map, spec)? {
                specs.push(scale_spec);
            }
        }

        let span = Span::covering(specs.iter().copied())?;
        let words = self.read_span(span).await?;

        let mut values = HashMap::with_capacity(names.len());

        for spec in specs.iter().filter(|spec| spec.kind != RegisterType::ScaleFactor) {
            values.insert(spec.name, self.decode_from(spec, span, &words)?);
        }

        Ok(values)
    }

    /// Writes raw register words and returns the value read back from the device.
    pub async fn write_register(&mut self, name: &str, values: &[u16]) -> Result<Value> {
        let spec = find_spec(self.map, name)?;

        if values.len() != spec.len() as usize {
            return Err(SunspecError::Config(format!(
                "{name}: values.length mismatch (is: {}, expect: {})",
                values.len(),
                spec.len()
            )));
        }

        self.transport()?.write_multiple(spec.start - 1, values).await?;

        self.read_register(name).await
    }

    /// Writes a human value, applying the register's current scale factor.
    pub async fn write_value(&mut self, name: &str, value: f64) -> Result<Value> {
        let spec = find_spec(self.map, name)?;

        let scale_exp = match find_scale(self.map, spec)? {
            Some(scale_spec) => {
                let exp = self.read_register(scale_spec.name).await?;
                exp.as_f64().map(|e| e as i16)
            },
            None => None,
        };

        let words = encode(spec, value, scale_exp)?;
        self.write_register(name, &words).await
    }
}
