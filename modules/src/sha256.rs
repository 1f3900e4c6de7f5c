//! SHA-256 provider for the `HashRequest` interface

use crate::hash::{HashInput, Hasher, HASH_INTERFACE, REQ_DIGEST, REQ_HASHER};
use modircd_core::{
    CapabilitySet, Error, Module, ModuleContext, Request, Result, Version, VersionFlags,
};
use sha2::{Digest, Sha256};
use std::any::Any;
use std::sync::Arc;
use tracing::debug;

pub fn sha256(data: &[u8]) -> Vec<u8> {
    Sha256::digest(data).to_vec()
}

pub struct Sha256Module;

impl Sha256Module {
    pub fn new() -> Self {
        Self
    }
}

impl Default for Sha256Module {
    fn default() -> Self {
        Self::new()
    }
}

impl Module for Sha256Module {
    fn name(&self) -> &str {
        "sha256"
    }

    fn version(&self) -> Version {
        Version::new(1, 1, 0, 0, VersionFlags::VENDOR | VersionFlags::SERVICE_PROVIDER)
    }

    fn description(&self) -> &str {
        "SHA-256 hash provider"
    }

    fn implements(&self) -> CapabilitySet {
        CapabilitySet::empty()
    }

    fn init(&mut self, ctx: &mut ModuleContext<'_>) -> Result<()> {
        if !ctx.publish_feature("sha256") {
            return Err(Error::Generic("feature 'sha256' is already provided".to_string()));
        }
        ctx.publish_interface(HASH_INTERFACE);
        Ok(())
    }

    fn on_unload(&mut self, ctx: &mut ModuleContext<'_>) {
        ctx.unpublish_interface(HASH_INTERFACE);
        ctx.unpublish_feature("sha256");
    }

    fn on_request(&mut self, request: &Request<'_>) -> Option<Box<dyn Any + Send>> {
        match request.id() {
            REQ_DIGEST => {
                let input = request.data::<HashInput>()?;
                debug!("sha256: hashing {} bytes for {}", input.0.len(), request.source());
                Some(Box::new(sha256(&input.0)))
            }
            REQ_HASHER => {
                let hasher: Hasher = Arc::new(sha256);
                Some(Box::new(hasher))
            }
            _ => None,
        }
    }
}
