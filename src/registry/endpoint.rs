//! Backend endpoint address.

use std::fmt;

use serde::{Serialize, Serializer};

use crate::coordination::ServiceInstance;

/// A `host:port` pair a request can be forwarded to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Endpoint advertised by a catalog instance. `None` when the instance
    /// registered without an address.
    pub fn from_instance(instance: &ServiceInstance) -> Option<Self> {
        if instance.address.is_empty() {
            return None;
        }
        Some(Self::new(instance.address.clone(), instance.port))
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl Serialize for Endpoint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance(address: &str) -> ServiceInstance {
        ServiceInstance {
            id: "web-1".into(),
            service: "web".into(),
            address: address.into(),
            port: 8080,
            tags: vec![],
        }
    }

    #[test]
    fn test_display() {
        let ep = Endpoint::new("10.0.0.7", 8080);
        assert_eq!(ep.host(), "10.0.0.7");
        assert_eq!(ep.port(), 8080);
        assert_eq!(ep.to_string(), "10.0.0.7:8080");
        assert_eq!(Endpoint::new("::1", 9000).to_string(), "[::1]:9000");
    }

    #[test]
    fn test_from_instance_skips_empty_address() {
        assert_eq!(Endpoint::from_instance(&instance("")), None);
        assert_eq!(
            Endpoint::from_instance(&instance("web.internal")),
            Some(Endpoint::new("web.internal", 8080))
        );
    }

    #[test]
    fn test_serializes_as_string() {
        let json = serde_json::to_string(&vec![Endpoint::new("a", 1)]).unwrap();
        assert_eq!(json, r#"["a:1"]"#);
    }
}
