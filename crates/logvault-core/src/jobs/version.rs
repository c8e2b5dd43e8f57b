use crate::error::Error;
use std::fmt;
use std::str::FromStr;

/// A job version normalized to zero-padded hex components.
///
/// `"1.10"` becomes `"0001.000a"`, so plain string order is version order
/// for versions with the same number of components.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct JobVersion(String);

impl JobVersion {
    pub fn parse(raw: &str) -> Result<Self, Error> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(Error::Version(raw.to_string()));
        }
        let components = raw
            .split('.')
            .map(|part| {
                part.parse::<u16>()
                    .map(|n| format!("{:04x}", n))
                    .map_err(|_| Error::Version(raw.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(JobVersion(components.join(".")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for JobVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for JobVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
