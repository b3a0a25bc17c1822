use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// URL scheme shared by all locators.
pub const SCHEME: &str = "tessera";

/// Port assumed for remote locators that do not name one.
pub const DEFAULT_REMOTE_PORT: u16 = 13100;

/// URL-like identifier resolving to a backing data store.
///
/// Canonical forms:
///
/// - `tessera:/<directory>/<name>` for a project on the local filesystem
/// - `tessera://<host>[:<port>]/<repository>` for a repository on a server
///
/// Locators are compared structurally: the host is lower-cased and an
/// omitted port is the same as [`DEFAULT_REMOTE_PORT`], so two spellings of
/// the same remote compare equal.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Locator {
    Local { directory: String, name: String },
    Remote { host: String, port: u16, repository: String },
}

impl Locator {
    /// Locator for a local project named `name` stored under `directory`.
    pub fn local(directory: &str, name: &str) -> Result<Self, TypeError> {
        let directory = directory.trim_end_matches('/');
        let raw = format!("{SCHEME}:{directory}/{name}");
        Self::parse(&raw)
    }

    /// Locator for a repository on a remote server.
    pub fn remote(host: &str, port: u16, repository: &str) -> Result<Self, TypeError> {
        Self::parse(&format!("{SCHEME}://{host}:{port}/{repository}"))
    }

    /// Parse a locator string.
    pub fn parse(input: &str) -> Result<Self, TypeError> {
        let rest = input
            .strip_prefix(SCHEME)
            .and_then(|r| r.strip_prefix(':'))
            .ok_or_else(|| TypeError::locator(input, format!("expected `{SCHEME}:` scheme")))?;

        match rest.strip_prefix("//") {
            Some(authority_and_path) => Self::parse_remote(input, authority_and_path),
            None => Self::parse_local(input, rest),
        }
    }

    fn parse_local(input: &str, path: &str) -> Result<Self, TypeError> {
        if !path.starts_with('/') {
            return Err(TypeError::locator(input, "local path must be absolute"));
        }
        let segments: Vec<&str> = path[1..].split('/').collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(TypeError::locator(input, "empty path segment"));
        }
        if segments.iter().any(|s| *s == "." || *s == "..") {
            return Err(TypeError::locator(input, "relative path segment"));
        }
        let (name, parents) = segments
            .split_last()
            .ok_or_else(|| TypeError::locator(input, "missing project name"))?;
        Ok(Self::Local {
            directory: format!("/{}", parents.join("/")),
            name: (*name).to_string(),
        })
    }

    fn parse_remote(input: &str, rest: &str) -> Result<Self, TypeError> {
        let (authority, repository) = rest
            .split_once('/')
            .ok_or_else(|| TypeError::locator(input, "missing repository name"))?;
        if repository.is_empty() || repository.contains('/') {
            return Err(TypeError::locator(
                input,
                "repository must be a single path segment",
            ));
        }
        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse::<u16>()
                    .map_err(|_| TypeError::locator(input, format!("invalid port {port:?}")))?;
                (host, port)
            }
            None => (authority, DEFAULT_REMOTE_PORT),
        };
        if host.is_empty() {
            return Err(TypeError::locator(input, "missing host"));
        }
        if port == 0 {
            return Err(TypeError::locator(input, "port must be non-zero"));
        }
        Ok(Self::Remote {
            host: host.to_ascii_lowercase(),
            port,
            repository: repository.to_string(),
        })
    }

    /// Project or repository name.
    pub fn name(&self) -> &str {
        match self {
            Locator::Local { name, .. } => name,
            Locator::Remote { repository, .. } => repository,
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Locator::Local { .. })
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, Locator::Remote { .. })
    }

    /// Filesystem location of a local project (`directory/name`).
    pub fn local_path(&self) -> Option<PathBuf> {
        match self {
            Locator::Local { directory, name } => Some(PathBuf::from(directory).join(name)),
            Locator::Remote { .. } => None,
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Local { directory, name } if directory == "/" => {
                write!(f, "{SCHEME}:/{name}")
            }
            Locator::Local { directory, name } => write!(f, "{SCHEME}:{directory}/{name}"),
            Locator::Remote {
                host,
                port,
                repository,
            } if *port == DEFAULT_REMOTE_PORT => write!(f, "{SCHEME}://{host}/{repository}"),
            Locator::Remote {
                host,
                port,
                repository,
            } => write!(f, "{SCHEME}://{host}:{port}/{repository}"),
        }
    }
}

impl FromStr for Locator {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Locator {
    type Error = TypeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Locator> for String {
    fn from(locator: Locator) -> Self {
        locator.to_string()
    }
}
