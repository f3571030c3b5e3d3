use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

/// Datastore backend kinds
///
/// Defined in core because it appears in configuration and in the record store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatastoreKind {
    /// Plain files under a base directory
    File,
    /// S3-compatible object storage
    S3,
    /// Content-addressed peer storage (IPFS HTTP API)
    Ipfs,
}

impl DatastoreKind {
    /// Only object storage can hand out presigned URLs or stat objects.
    pub fn supports_delegation(&self) -> bool {
        matches!(self, DatastoreKind::S3)
    }
}

impl FromStr for DatastoreKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "file" => Ok(DatastoreKind::File),
            "s3" => Ok(DatastoreKind::S3),
            "ipfs" => Ok(DatastoreKind::Ipfs),
            _ => Err(anyhow::anyhow!("Invalid datastore type: {}", s)),
        }
    }
}

impl Display for DatastoreKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            DatastoreKind::File => write!(f, "file"),
            DatastoreKind::S3 => write!(f, "s3"),
            DatastoreKind::Ipfs => write!(f, "ipfs"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_kinds_case_insensitively() {
        assert_eq!("file".parse::<DatastoreKind>().unwrap(), DatastoreKind::File);
        assert_eq!("S3".parse::<DatastoreKind>().unwrap(), DatastoreKind::S3);
        assert_eq!(" ipfs ".parse::<DatastoreKind>().unwrap(), DatastoreKind::Ipfs);
        assert!("nfs".parse::<DatastoreKind>().is_err());
    }
}
