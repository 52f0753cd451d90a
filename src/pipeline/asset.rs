//! The exposed-asset slot.
//!
//! The slot owns the only strong reference to the current [`EncodedAsset`].
//! Callers get an [`AssetRef`], a transient weak reference that stops
//! resolving the moment the asset is released or replaced, or take the bytes
//! out of the slot entirely with [`AssetSlot::take`].

use std::sync::{Arc, Weak};

use crate::audio::types::EncodedAsset;

/// Transient reference to an issued asset.
#[derive(Debug, Clone)]
pub struct AssetRef {
    id: u64,
    asset: Weak<EncodedAsset>,
}

impl AssetRef {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The asset, while it has not been revoked.
    pub fn get(&self) -> Option<Arc<EncodedAsset>> {
        self.asset.upgrade()
    }

    pub fn is_revoked(&self) -> bool {
        self.asset.strong_count() == 0
    }
}

#[derive(Debug, Default)]
pub struct AssetSlot {
    current: Option<(u64, Arc<EncodedAsset>)>,
    next_id: u64,
}

impl AssetSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `asset`, revoking whatever was there before.
    pub fn issue(&mut self, asset: EncodedAsset) -> AssetRef {
        self.revoke();
        self.next_id += 1;
        let id = self.next_id;
        let asset = Arc::new(asset);
        let asset_ref = AssetRef {
            id,
            asset: Arc::downgrade(&asset),
        };
        log::debug!("asset: issued #{id} ({} bytes)", asset.bytes.len());
        self.current = Some((id, asset));
        asset_ref
    }

    /// Release the asset with `id`.  Returns `false` if it is not current.
    pub fn release(&mut self, id: u64) -> bool {
        match &self.current {
            Some((current, _)) if *current == id => {
                self.revoke();
                true
            }
            _ => false,
        }
    }

    /// Revoke the current asset, if any.
    pub fn revoke(&mut self) {
        if let Some((id, _)) = self.current.take() {
            log::debug!("asset: revoked #{id}");
        }
    }

    /// Move the current asset out of the slot.
    ///
    /// Outstanding [`AssetRef`]s are revoked.  If a caller is still holding
    /// an upgraded `Arc`, the bytes are copied instead of moved.
    pub fn take(&mut self) -> Option<EncodedAsset> {
        let (id, asset) = self.current.take()?;
        log::debug!("asset: #{id} taken by caller");
        Some(Arc::try_unwrap(asset).unwrap_or_else(|shared| (*shared).clone()))
    }

    /// A fresh reference to the current asset.
    pub fn current(&self) -> Option<AssetRef> {
        self.current.as_ref().map(|(id, asset)| AssetRef {
            id: *id,
            asset: Arc::downgrade(asset),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
