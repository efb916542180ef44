//! Set of codecs a hub accepts, and handshake negotiation against it.

use std::collections::HashMap;
use std::sync::Arc;

use crate::errors::CodecRegistryError;
use crate::handshake::{HandshakeRejection, HandshakeRequest};
use crate::protocol::codec::{HubCodec, TransferFormat};
use crate::protocol::json::JsonCodec;
use crate::protocol::msgpack::MessagePackCodec;

/// Registered codecs keyed by protocol name.
#[derive(Clone, Debug)]
pub struct CodecRegistry {
    codecs: HashMap<String, Arc<dyn HubCodec>>,
}

impl CodecRegistry {
    /// Build from a list of codecs. Fails on an empty list or a repeated name.
    pub fn new(codecs: Vec<Arc<dyn HubCodec>>) -> Result<Self, CodecRegistryError> {
        if codecs.is_empty() {
            return Err(CodecRegistryError::Empty);
        }
        let mut map = HashMap::with_capacity(codecs.len());
        for codec in codecs {
            let name = codec.name().to_owned();
            if map.contains_key(&name) {
                return Err(CodecRegistryError::Duplicate(name));
            }
            let _ = map.insert(name, codec);
        }
        Ok(Self { codecs: map })
    }

    /// Registry holding only the JSON codec.
    pub fn json() -> Self {
        let mut codecs: HashMap<String, Arc<dyn HubCodec>> = HashMap::new();
        let codec: Arc<dyn HubCodec> = Arc::new(JsonCodec::new());
        let _ = codecs.insert(codec.name().to_owned(), codec);
        Self { codecs }
    }

    /// Registry holding every built-in codec: `json` and `messagepack`.
    pub fn builtin() -> Self {
        let mut registry = Self::json();
        let codec: Arc<dyn HubCodec> = Arc::new(MessagePackCodec::new());
        let _ = registry.codecs.insert(codec.name().to_owned(), codec);
        registry
    }

    /// Keep only the named protocols. An empty allow-list keeps everything.
    pub fn restrict(mut self, allowed: &[String]) -> Result<Self, CodecRegistryError> {
        if allowed.is_empty() {
            return Ok(self);
        }
        self.codecs.retain(|name, _| allowed.iter().any(|a| a == name));
        if self.codecs.is_empty() {
            return Err(CodecRegistryError::Empty);
        }
        Ok(self)
    }

    /// Look up a codec by protocol name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn HubCodec>> {
        self.codecs.get(name).cloned()
    }

    /// Registered protocol names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.codecs.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Pick the codec for a handshake request. `binary_transport` says
    /// whether the transport can carry binary payloads.
    pub fn negotiate(
        &self,
        request: &HandshakeRequest,
        binary_transport: bool,
    ) -> Result<Arc<dyn HubCodec>, HandshakeRejection> {
        let codec = self
            .get(&request.protocol)
            .ok_or_else(|| HandshakeRejection::UnsupportedProtocol(request.protocol.clone()))?;
        if !codec.supports_version(request.version) {
            return Err(HandshakeRejection::UnsupportedVersion {
                protocol: request.protocol.clone(),
                version: request.version,
            });
        }
        if codec.transfer_format() == TransferFormat::Binary && !binary_transport {
            return Err(HandshakeRejection::UnsupportedTransferFormat {
                protocol: request.protocol.clone(),
                format: TransferFormat::Binary,
            });
        }
        Ok(codec)
    }
}

impl Default for CodecRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
