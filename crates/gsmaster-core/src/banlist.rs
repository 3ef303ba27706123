//! Registration ban list
//!
//! Shell-style glob patterns matched against the `host:port` rendering of
//! a registering address. Any match blocks the registration.

use std::net::SocketAddr;

use glob::Pattern;

use crate::error::{MasterError, MasterResult};

#[derive(Debug, Default)]
pub struct BanList {
    patterns: Vec<Pattern>,
}

impl BanList {
    /// Compile the configured pattern strings. An invalid pattern is a
    /// startup error.
    pub fn new(patterns: &[String]) -> MasterResult<BanList> {
        let patterns = patterns
            .iter()
            .map(|p| {
                Pattern::new(p).map_err(|source| MasterError::BanPattern {
                    pattern: p.clone(),
                    source,
                })
            })
            .collect::<MasterResult<Vec<_>>>()?;
        Ok(BanList { patterns })
    }

    /// Whether `addr` matches any ban pattern (case-sensitive).
    pub fn is_blocked(&self, addr: SocketAddr) -> bool {
        let rendered = addr.to_string();
        self.patterns.iter().any(|p| p.matches(&rendered))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_empty_list_blocks_nothing() {
        let list = BanList::new(&[]).unwrap();
        assert!(!list.is_blocked(addr("203.0.113.5:2342")));
    }

    #[test]
    fn test_exact_and_wildcard_patterns() {
        let list = BanList::new(&[
            "203.0.113.5:2342".to_string(),
            "198.51.100.*".to_string(),
        ])
        .unwrap();

        assert!(list.is_blocked(addr("203.0.113.5:2342")));
        assert!(!list.is_blocked(addr("203.0.113.5:2343")));
        assert!(list.is_blocked(addr("198.51.100.17:5000")));
        assert!(!list.is_blocked(addr("192.0.2.1:2342")));
    }

    #[test]
    fn test_character_class_pattern() {
        let list = BanList::new(&["203.0.113.[57]:*".to_string()]).unwrap();
        assert!(list.is_blocked(addr("203.0.113.5:2342")));
        assert!(list.is_blocked(addr("203.0.113.7:9999")));
        assert!(!list.is_blocked(addr("203.0.113.6:2342")));
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        assert!(BanList::new(&["[".to_string()]).is_err());
    }
}
