use base64::prelude::BASE64_STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use url::Url;

use crate::error::{Result, VdkError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EncryptionMethod {
    #[default]
    None,
    Aes128,
}

/// Key material for one fragment.
///
/// `key` is filled in by the key loader; a fragment whose key URI is set but
/// whose key is still missing cannot be demuxed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecryptMetadata {
    pub method: EncryptionMethod,
    pub key: Option<[u8; 16]>,
    pub iv: Option<[u8; 16]>,
    pub uri: Option<Url>,
}

impl DecryptMetadata {
    pub fn aes128(uri: Url, iv: Option<[u8; 16]>) -> Self {
        let mut meta = Self {
            method: EncryptionMethod::Aes128,
            key: None,
            iv,
            uri: Some(uri),
        };
        // Inline keys never go through the key loader.
        if let Ok(Some(key)) = meta.inline_key() {
            meta.key = Some(key);
        }
        meta
    }

    pub fn is_encrypted(&self) -> bool {
        self.method == EncryptionMethod::Aes128
    }

    /// True while the key still has to be fetched.
    pub fn needs_key(&self) -> bool {
        self.is_encrypted() && self.uri.is_some() && self.key.is_none()
    }

    /// IV for fragment `sn`: the explicit one, else the sequence number as a
    /// 128-bit big-endian integer.
    pub fn iv_for(&self, sn: u64) -> [u8; 16] {
        self.iv.unwrap_or_else(|| {
            let mut iv = [0u8; 16];
            iv[8..].copy_from_slice(&sn.to_be_bytes());
            iv
        })
    }

    /// Decodes a `data:` key URI carrying the key bytes in base64.
    pub fn inline_key(&self) -> Result<Option<[u8; 16]>> {
        let Some(uri) = &self.uri else {
            return Ok(None);
        };
        if uri.scheme() != "data" {
            return Ok(None);
        }
        let payload = uri.path();
        let (header, body) = payload
            .split_once(',')
            .ok_or_else(|| VdkError::InvalidData("data uri without payload".into()))?;
        if !header.ends_with(";base64") {
            return Err(VdkError::InvalidData("data uri key is not base64".into()));
        }
        let bytes = BASE64_STANDARD
            .decode(body)
            .map_err(|e| VdkError::InvalidData(format!("bad base64 key: {}", e)))?;
        let key: [u8; 16] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| VdkError::InvalidData(format!("key is {} bytes, want 16", bytes.len())))?;
        Ok(Some(key))
    }
}

/// Identifies one load attempt of a fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FragmentRef {
    pub level: usize,
    pub sn: u64,
    pub load_idx: Option<u64>,
}

/// One loadable media segment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fragment {
    pub sn: u64,
    pub level: usize,
    pub url: Option<Url>,
    pub start: f64,
    pub duration: f64,
    /// `[start, end)` byte offsets within `url`.
    pub byte_range: Option<(u64, u64)>,
    pub cc: i64,
    pub decrypt: Option<DecryptMetadata>,
    pub program_date_time: Option<DateTime<Utc>>,

    pub load_counter: u32,
    pub load_idx: Option<u64>,
    pub dropped: u32,
    pub delta_pts: Option<f64>,
    pub start_pts: Option<f64>,
    pub end_pts: Option<f64>,
    pub pts_dts_shift: f64,
    pub first_gop: Option<f64>,
    pub last_gop: Option<f64>,
    pub loaded: bool,
}

impl Fragment {
    pub fn new(level: usize, sn: u64, start: f64, duration: f64) -> Self {
        Self {
            sn,
            level,
            start,
            duration,
            ..Default::default()
        }
    }

    pub fn with_url(mut self, url: Url) -> Self {
        self.url = Some(url);
        self
    }

    pub fn with_cc(mut self, cc: i64) -> Self {
        self.cc = cc;
        self
    }

    pub fn with_decrypt(mut self, decrypt: DecryptMetadata) -> Self {
        self.decrypt = Some(decrypt);
        self
    }

    pub fn with_program_date_time(mut self, pdt: DateTime<Utc>) -> Self {
        self.program_date_time = Some(pdt);
        self
    }

    pub fn end(&self) -> f64 {
        self.start + self.duration
    }

    pub fn reference(&self) -> FragmentRef {
        FragmentRef {
            level: self.level,
            sn: self.sn,
            load_idx: self.load_idx,
        }
    }

    pub fn needs_key(&self) -> bool {
        self.decrypt.as_ref().is_some_and(DecryptMetadata::needs_key)
    }

    /// Program date time in milliseconds since the Unix epoch.
    pub fn program_time_ms(&self) -> Option<f64> {
        self.program_date_time
            .map(|pdt| pdt.timestamp_millis() as f64)
    }
}
