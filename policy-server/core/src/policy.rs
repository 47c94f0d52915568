use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A permitted connection from a source app to a destination app.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Policy {
    pub source: Source,
    pub destination: Destination,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Source {
    pub id: String,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
}

/// An inclusive range of destination ports.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Ports {
    pub start: u16,
    pub end: u16,
}

/// The destination of a policy.
///
/// A destination always carries a canonical port range. The single `port` is
/// only present when that range covers exactly one port. Both are derived
/// once, when the destination is built, and cannot be changed afterwards.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawDestination", into = "RawDestination")]
pub struct Destination {
    pub id: String,
    pub protocol: Protocol,
    port: Option<u16>,
    ports: Ports,
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("ports and port mismatch")]
    PortMismatch,

    #[error("destination must specify a port or a port range")]
    MissingPort,

    #[error("invalid port {0}: ports must be between 1 and 65535")]
    InvalidPort(u16),

    #[error("invalid port range {start}-{end}: start must not be greater than end")]
    InvalidRange { start: u16, end: u16 },

    #[error("missing source id")]
    MissingSourceId,

    #[error("missing destination id")]
    MissingDestinationId,

    #[error("missing policies")]
    NoPolicies,
}

/// The wire representation of a destination, before reconciliation.
#[derive(Clone, Debug, Serialize, Deserialize)]
struct RawDestination {
    id: String,
    protocol: Protocol,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ports: Option<Ports>,
}

/// Reconciles a destination's single-port and port-range fields.
///
/// Returns the canonical single port (only when the range is exactly one
/// port) and the canonical range. When both fields are given they must
/// describe the same single port.
pub fn reconcile(
    port: Option<u16>,
    ports: Option<Ports>,
) -> Result<(Option<u16>, Ports), ValidationError> {
    let ports = match (port, ports) {
        (None, None) => return Err(ValidationError::MissingPort),
        (Some(port), None) => Ports::single(port),
        (None, Some(ports)) => ports,
        (Some(port), Some(ports)) => {
            if ports.start != port || ports.end != port {
                return Err(ValidationError::PortMismatch);
            }
            ports
        }
    };
    let ports = ports.validate()?;
    Ok((ports.single_port(), ports))
}

/// Checks that a batch of policies is non-empty and that every policy names
/// both of its apps.
pub fn validate_policies(policies: &[Policy]) -> Result<(), ValidationError> {
    if policies.is_empty() {
        return Err(ValidationError::NoPolicies);
    }
    for policy in policies {
        policy.validate()?;
    }
    Ok(())
}

// === impl Policy ===

impl Policy {
    pub fn new(source: impl Into<String>, destination: Destination) -> Self {
        Self {
            source: Source { id: source.into() },
            destination,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.source.id.is_empty() {
            return Err(ValidationError::MissingSourceId);
        }
        if self.destination.id.is_empty() {
            return Err(ValidationError::MissingDestinationId);
        }
        Ok(())
    }

    /// Returns the app ids referenced by this policy.
    pub fn app_ids(&self) -> [&str; 2] {
        [&self.source.id, &self.destination.id]
    }
}

// === impl Ports ===

impl Ports {
    pub fn single(port: u16) -> Self {
        Self {
            start: port,
            end: port,
        }
    }

    pub fn is_single(&self) -> bool {
        self.start == self.end
    }

    fn single_port(&self) -> Option<u16> {
        self.is_single().then_some(self.start)
    }

    fn validate(self) -> Result<Self, ValidationError> {
        if self.start == 0 {
            return Err(ValidationError::InvalidPort(self.start));
        }
        if self.end == 0 {
            return Err(ValidationError::InvalidPort(self.end));
        }
        if self.start > self.end {
            return Err(ValidationError::InvalidRange {
                start: self.start,
                end: self.end,
            });
        }
        Ok(self)
    }
}

// === impl Destination ===

impl Destination {
    pub fn new(
        id: impl Into<String>,
        protocol: Protocol,
        port: Option<u16>,
        ports: Option<Ports>,
    ) -> Result<Self, ValidationError> {
        let (port, ports) = reconcile(port, ports)?;
        Ok(Self {
            id: id.into(),
            protocol,
            port,
            ports,
        })
    }

    pub fn with_port(
        id: impl Into<String>,
        protocol: Protocol,
        port: u16,
    ) -> Result<Self, ValidationError> {
        Self::new(id, protocol, Some(port), None)
    }

    pub fn with_ports(
        id: impl Into<String>,
        protocol: Protocol,
        ports: Ports,
    ) -> Result<Self, ValidationError> {
        Self::new(id, protocol, None, Some(ports))
    }

    /// The destination port, if the destination covers exactly one port.
    pub fn port(&self) -> Option<u16> {
        self.port
    }

    pub fn ports(&self) -> Ports {
        self.ports
    }
}

impl TryFrom<RawDestination> for Destination {
    type Error = ValidationError;

    fn try_from(raw: RawDestination) -> Result<Self, Self::Error> {
        let RawDestination {
            id,
            protocol,
            port,
            ports,
        } = raw;
        Self::new(id, protocol, port, ports)
    }
}

impl From<Destination> for RawDestination {
    fn from(dst: Destination) -> Self {
        Self {
            id: dst.id,
            protocol: dst.protocol,
            port: dst.port,
            ports: Some(dst.ports),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn decode(value: serde_json::Value) -> Result<Destination, serde_json::Error> {
        serde_json::from_value(value)
    }

    #[test]
    fn single_port_becomes_degenerate_range() {
        for port in [1, 80, 8080, u16::MAX] {
            let (canonical, ports) = reconcile(Some(port), None).unwrap();
            assert_eq!(canonical, Some(port));
            assert_eq!(ports, Ports::single(port));
        }
    }

    #[test]
    fn single_port_range_sets_port() {
        let (port, ports) = reconcile(None, Some(Ports::single(8080))).unwrap();
        assert_eq!(port, Some(8080));
        assert_eq!(ports, Ports::single(8080));
    }

    #[test]
    fn wide_range_leaves_port_unset() {
        let range = Ports {
            start: 8080,
            end: 8090,
        };
        let (port, ports) = reconcile(None, Some(range)).unwrap();
        assert_eq!(port, None);
        assert_eq!(ports, range);
    }

    #[test]
    fn matching_port_and_range() {
        let (port, ports) = reconcile(Some(8080), Some(Ports::single(8080))).unwrap();
        assert_eq!(port, Some(8080));
        assert_eq!(ports, Ports::single(8080));
    }

    #[test]
    fn mismatched_port_and_range() {
        let wide = Ports {
            start: 123,
            end: 456,
        };
        assert_eq!(
            reconcile(Some(8080), Some(wide)),
            Err(ValidationError::PortMismatch)
        );
        assert_eq!(
            reconcile(Some(123), Some(Ports::single(8080))),
            Err(ValidationError::PortMismatch)
        );
        // A port that falls inside the range is still a mismatch.
        assert_eq!(
            reconcile(Some(200), Some(wide)),
            Err(ValidationError::PortMismatch)
        );
    }

    #[test]
    fn missing_port_specification() {
        assert_eq!(reconcile(None, None), Err(ValidationError::MissingPort));
    }

    #[test]
    fn invalid_ports() {
        assert_eq!(reconcile(Some(0), None), Err(ValidationError::InvalidPort(0)));
        assert_eq!(
            reconcile(None, Some(Ports { start: 0, end: 10 })),
            Err(ValidationError::InvalidPort(0))
        );
        assert_eq!(
            reconcile(None, Some(Ports { start: 10, end: 9 })),
            Err(ValidationError::InvalidRange { start: 10, end: 9 })
        );
    }

    #[test]
    fn decodes_range_only() {
        let dst = decode(json!({
            "id": "some-other-app-guid",
            "protocol": "tcp",
            "ports": { "start": 8080, "end": 8090 },
        }))
        .unwrap();
        assert_eq!(dst.id, "some-other-app-guid");
        assert_eq!(dst.protocol, Protocol::Tcp);
        assert_eq!(dst.port(), None);
        assert_eq!(
            dst.ports(),
            Ports {
                start: 8080,
                end: 8090
            }
        );
    }

    #[test]
    fn decodes_port_only() {
        let dst = decode(json!({
            "id": "some-other-app-guid",
            "protocol": "udp",
            "port": 8080,
        }))
        .unwrap();
        assert_eq!(
            dst,
            Destination::with_ports("some-other-app-guid", Protocol::Udp, Ports::single(8080))
                .unwrap()
        );
        assert_eq!(dst.port(), Some(8080));
    }

    #[test]
    fn decode_rejects_mismatch() {
        let err = decode(json!({
            "id": "some-other-app-guid",
            "protocol": "tcp",
            "port": 123,
            "ports": { "start": 8080, "end": 8080 },
        }))
        .unwrap_err();
        assert!(
            err.to_string().starts_with("ports and port mismatch"),
            "{err}"
        );
    }

    #[test]
    fn decode_rejects_missing_ports() {
        let err = decode(json!({ "id": "some-app-guid", "protocol": "tcp" })).unwrap_err();
        assert!(
            err.to_string()
                .starts_with("destination must specify a port or a port range"),
            "{err}"
        );
    }

    #[test]
    fn decode_rejects_unknown_protocol() {
        assert!(decode(json!({ "id": "a", "protocol": "icmp", "port": 1 })).is_err());
    }

    #[test]
    fn encodes_port_only_for_single_port_ranges() {
        let wide = Destination::with_ports(
            "some-other-app-guid",
            Protocol::Tcp,
            Ports {
                start: 123,
                end: 456,
            },
        )
        .unwrap();
        assert_eq!(
            serde_json::to_value(&wide).unwrap(),
            json!({
                "id": "some-other-app-guid",
                "protocol": "tcp",
                "ports": { "start": 123, "end": 456 },
            })
        );

        let single = Destination::with_port("some-other-app-guid", Protocol::Tcp, 8080).unwrap();
        assert_eq!(
            serde_json::to_value(&single).unwrap(),
            json!({
                "id": "some-other-app-guid",
                "protocol": "tcp",
                "port": 8080,
                "ports": { "start": 8080, "end": 8080 },
            })
        );
    }

    #[test]
    fn encoding_is_reversible() {
        let destinations = [
            Destination::with_port("a", Protocol::Tcp, 1).unwrap(),
            Destination::with_port("b", Protocol::Udp, u16::MAX).unwrap(),
            Destination::with_ports("c", Protocol::Tcp, Ports { start: 10, end: 20 }).unwrap(),
        ];
        for dst in destinations {
            let encoded = serde_json::to_string(&dst).unwrap();
            assert_eq!(serde_json::from_str::<Destination>(&encoded).unwrap(), dst);
        }
    }

    #[test]
    fn policies_must_name_their_apps() {
        let dst = Destination::with_port("b", Protocol::Tcp, 80).unwrap();
        assert_eq!(validate_policies(&[]), Err(ValidationError::NoPolicies));
        assert_eq!(
            validate_policies(&[Policy::new("", dst.clone())]),
            Err(ValidationError::MissingSourceId)
        );

        let anonymous = Destination::with_port("", Protocol::Tcp, 80).unwrap();
        assert_eq!(
            validate_policies(&[Policy::new("a", anonymous)]),
            Err(ValidationError::MissingDestinationId)
        );
        assert!(validate_policies(&[Policy::new("a", dst)]).is_ok());
    }
}
