use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use ipnet::Ipv6Net;
use std::fmt;
use std::net::{Ipv6Addr, SocketAddrV6};

// ============================================================================
// Key Material
// ============================================================================

/// Curve25519 keys are exchanged as base64 of exactly 32 bytes
const KEY_LEN: usize = 32;

fn validate_key(raw: &str) -> Result<String, String> {
    let key = raw.trim();
    let bytes = STANDARD
        .decode(key)
        .map_err(|e| format!("key is not valid base64: {}", e))?;
    if bytes.len() != KEY_LEN {
        return Err(format!(
            "key decodes to {} bytes, expected {}",
            bytes.len(),
            KEY_LEN
        ));
    }
    Ok(key.to_string())
}

/// Overlay private key. `Debug` never prints the key itself.
#[derive(Clone, PartialEq, Eq)]
pub struct PrivateKey(String);

impl PrivateKey {
    pub fn parse(raw: &str) -> Result<Self, String> {
        validate_key(raw).map(Self)
    }

    /// The encoded key, for the two places allowed to see it: the local
    /// overlay config and the owning site's provisioning call
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateKey(<redacted>)")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PublicKey(String);

impl PublicKey {
    pub fn parse(raw: &str) -> Result<Self, String> {
        validate_key(raw).map(Self)
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPair {
    pub private: PrivateKey,
    pub public: PublicKey,
}

// ============================================================================
// Topology
// ============================================================================

/// One remote host taking part in the cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteRecord {
    pub site_id: u16,
    /// `user@host` used to open the remote channel
    pub login_target: String,
    /// Host part of the login target, reachable over the public network
    pub endpoint: String,
    pub keys: KeyPair,
    pub overlay_block: Ipv6Net,
}

/// The scheduler's own identity. It sits in block 0, outside the site ID space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerRecord {
    pub keys: KeyPair,
    pub address: Ipv6Addr,
    pub endpoint: String,
}

#[derive(Debug, Clone)]
pub struct Topology {
    pub scheduler: SchedulerRecord,
    pub sites: Vec<SiteRecord>,
}

impl Topology {
    /// Peers a site needs to dial: the scheduler first as site 0, then every
    /// other site in site ID order. The recipient itself is never included.
    pub fn peers_for(&self, site_id: u16) -> PeerList {
        let scheduler = PeerDescriptor {
            site_id: 0,
            public_key: self.scheduler.keys.public.clone(),
            endpoint: self.scheduler.endpoint.clone(),
        };

        let others = self
            .sites
            .iter()
            .filter(|s| s.site_id != site_id)
            .map(|s| PeerDescriptor {
                site_id: s.site_id,
                public_key: s.keys.public.clone(),
                endpoint: s.endpoint.clone(),
            });

        PeerList(std::iter::once(scheduler).chain(others).collect())
    }
}

// ============================================================================
// Peer List (provisioning wire format)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerDescriptor {
    pub site_id: u16,
    pub public_key: PublicKey,
    pub endpoint: String,
}

impl fmt::Display for PeerDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.site_id, self.public_key, self.endpoint)
    }
}

/// Serializes as comma-joined `siteId:publicKey:endpoint` triples, which is
/// what the remote gateway script parses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerList(pub Vec<PeerDescriptor>);

impl PeerList {
    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl fmt::Display for PeerList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, peer) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}", peer)?;
        }
        Ok(())
    }
}

/// `host:port`, bracketing IPv6 literals
pub fn endpoint_with_port(endpoint: &str, port: u16) -> String {
    match endpoint.parse::<Ipv6Addr>() {
        Ok(addr) => SocketAddrV6::new(addr, port, 0, 0).to_string(),
        Err(_) => format!("{}:{}", endpoint, port),
    }
}
