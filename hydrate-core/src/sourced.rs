//! Aggregate results tagged with the tier that produced them.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Remote,
    Cache,
    LocalDerived,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Source::Remote => write!(f, "remote"),
            Source::Cache => write!(f, "cache"),
            Source::LocalDerived => write!(f, "local"),
        }
    }
}

/// An aggregate payload plus its provenance.
///
/// Has no `Default`; every constructor names its source.
#[derive(Debug, Clone, PartialEq)]
pub struct Sourced<T> {
    pub data: T,
    pub source: Source,
}

impl<T> Sourced<T> {
    pub fn remote(data: T) -> Self {
        Sourced {
            data,
            source: Source::Remote,
        }
    }

    pub fn cache(data: T) -> Self {
        Sourced {
            data,
            source: Source::Cache,
        }
    }

    pub fn local(data: T) -> Self {
        Sourced {
            data,
            source: Source::LocalDerived,
        }
    }

    pub fn is_fresh(&self) -> bool {
        self.source == Source::Remote
    }
}
