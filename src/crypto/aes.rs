use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use aes::Aes128;
use async_trait::async_trait;
use bytes::Bytes;
use cbc::cipher::block_padding::NoPadding;
use cbc::cipher::{BlockDecryptMut, KeyIvInit};
use log::{debug, error, warn};

use crate::{Result, VdkError};

pub const AES_BLOCK_SIZE: usize = 16;

type Aes128CbcDec = cbc::Decryptor<Aes128>;

/// AES-128-CBC decryption of one block-aligned buffer.
///
/// Implementations hold no chaining state: the caller passes the IV of every
/// buffer.
#[async_trait]
pub trait Decrypter: Send + Sync {
    async fn decrypt(&self, data: Bytes, key: [u8; 16], iv: [u8; 16]) -> Result<Bytes>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SoftwareDecrypter;

#[async_trait]
impl Decrypter for SoftwareDecrypter {
    async fn decrypt(&self, data: Bytes, key: [u8; 16], iv: [u8; 16]) -> Result<Bytes> {
        if data.len() % AES_BLOCK_SIZE != 0 {
            return Err(VdkError::Decrypt(format!(
                "ciphertext length {} is not a multiple of {}",
                data.len(),
                AES_BLOCK_SIZE
            )));
        }
        let mut buf = data.to_vec();
        Aes128CbcDec::new((&key).into(), (&iv).into())
            .decrypt_padded_mut::<NoPadding>(&mut buf)
            .map_err(|e| VdkError::Decrypt(e.to_string()))?;
        Ok(Bytes::from(buf))
    }
}

/// Uses a platform decrypter while it works, then software.
///
/// The first platform failure switches to software for good when software
/// decryption is enabled; otherwise the failure is returned.
pub struct FallbackDecrypter {
    platform: Option<Arc<dyn Decrypter>>,
    software: SoftwareDecrypter,
    enable_software_aes: bool,
    platform_disabled: AtomicBool,
}

impl FallbackDecrypter {
    pub fn new(platform: Option<Arc<dyn Decrypter>>, enable_software_aes: bool) -> Self {
        let platform_disabled = AtomicBool::new(platform.is_none());
        Self {
            platform,
            software: SoftwareDecrypter,
            enable_software_aes,
            platform_disabled,
        }
    }

    pub fn software_only() -> Self {
        Self::new(None, true)
    }

    pub fn uses_software(&self) -> bool {
        self.platform_disabled.load(Ordering::Acquire)
    }
}

#[async_trait]
impl Decrypter for FallbackDecrypter {
    async fn decrypt(&self, data: Bytes, key: [u8; 16], iv: [u8; 16]) -> Result<Bytes> {
        if let Some(platform) = self.platform.as_ref().filter(|_| !self.uses_software()) {
            debug!("decrypting {} bytes with the platform decrypter", data.len());
            match platform.decrypt(data.clone(), key, iv).await {
                Ok(plain) => return Ok(plain),
                Err(e) if self.enable_software_aes => {
                    warn!("platform decrypter failed ({}), switching to software", e);
                    self.platform_disabled.store(true, Ordering::Release);
                }
                Err(e) => {
                    error!("decrypting error : {}", e);
                    return Err(e);
                }
            }
        }
        if !self.enable_software_aes {
            return Err(VdkError::Decrypt("software decryption is disabled".into()));
        }
        debug!("decrypting {} bytes in software", data.len());
        self.software.decrypt(data, key, iv).await
    }
}
