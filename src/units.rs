use std::{fmt::Display, str::FromStr};

use anyhow::Context;
use chrono::Duration;

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy)]
pub struct Days(u32);

impl Days {
    pub fn as_duration(&self) -> Duration {
        Duration::days(self.0.into())
    }
}

impl Display for Days {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for Days {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl FromStr for Days {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let days: u32 = s
            .trim()
            .parse()
            .with_context(|| format!("Failed to parse {s:?} as a number of days"))?;
        Ok(Self(days))
    }
}
