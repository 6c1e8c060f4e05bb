use std::sync::Arc;

use bytes::Bytes;
use log::{debug, warn};

use super::aes::{Decrypter, AES_BLOCK_SIZE};
use super::aligner::{AlignedChunk, BlockAligner};
use crate::format::PushMeta;
use crate::playlist::DecryptMetadata;
use crate::{Result, VdkError};

/// Aligns the chunks of one segment and decrypts them in order.
///
/// The CBC chain is carried here: the IV of every buffer after the first is
/// the last ciphertext block of the buffer before it.
pub struct DecryptPipeline {
    aligner: BlockAligner,
    decrypter: Arc<dyn Decrypter>,
    iv: Option<[u8; 16]>,
    /// (level, sn) of the segment being aligned.
    segment: Option<(usize, u64)>,
    complete: bool,
}

impl DecryptPipeline {
    pub fn new(decrypter: Arc<dyn Decrypter>) -> Self {
        Self {
            aligner: BlockAligner::new(),
            decrypter,
            iv: None,
            segment: None,
            complete: true,
        }
    }

    pub fn reset(&mut self) {
        self.aligner.reset();
        self.iv = None;
        self.segment = None;
        self.complete = true;
    }

    /// Feeds one network chunk. Returns the plaintext ready for the demuxer,
    /// or `None` while the bytes are carried over.
    pub async fn push(
        &mut self,
        data: Bytes,
        decrypt: Option<&DecryptMetadata>,
        meta: &PushMeta,
    ) -> Result<Option<AlignedChunk>> {
        let segment = (meta.level, meta.sn);
        if self.segment != Some(segment) {
            if !self.complete {
                if let Some((level, sn)) = self.segment {
                    warn!(
                        "dropping {} carried bytes of unfinished segment sn {} level {}",
                        self.aligner.pending(),
                        sn,
                        level
                    );
                }
            }
            self.aligner.reset();
            self.iv = None;
            self.segment = Some(segment);
        }

        let Some(mut chunk) = self.aligner.push(data, meta.first, meta.final_chunk) else {
            self.complete = false;
            return Ok(None);
        };
        self.complete = chunk.final_chunk;

        let key = decrypt.filter(|d| d.is_encrypted()).and_then(|d| d.key);
        if let (Some(key), false) = (key, chunk.data.is_empty()) {
            let iv = match (chunk.first, self.iv) {
                (false, Some(iv)) => iv,
                _ => decrypt.map(|d| d.iv_for(meta.sn)).unwrap_or_default(),
            };
            let cipher = &chunk.data;
            if cipher.len() >= AES_BLOCK_SIZE {
                let mut next = [0u8; 16];
                next.copy_from_slice(&cipher[cipher.len() - AES_BLOCK_SIZE..]);
                self.iv = Some(next);
            }
            let mut plain = self.decrypter.decrypt(chunk.data.clone(), key, iv).await?;
            if chunk.final_chunk {
                plain = strip_pkcs7(plain, meta.sn);
            }
            debug!(
                "decrypted {} bytes of sn {} level {}",
                plain.len(),
                meta.sn,
                meta.level
            );
            chunk.data = plain;
        } else if decrypt.is_some_and(DecryptMetadata::needs_key) {
            return Err(VdkError::Decrypt(format!(
                "key for sn {} is not loaded",
                meta.sn
            )));
        }
        Ok(Some(chunk))
    }
}

fn strip_pkcs7(plain: Bytes, sn: u64) -> Bytes {
    let Some(&pad) = plain.last() else {
        return plain;
    };
    let pad = pad as usize;
    let valid = (1..=AES_BLOCK_SIZE).contains(&pad)
        && pad <= plain.len()
        && plain[plain.len() - pad..].iter().all(|&b| b as usize == pad);
    if valid {
        plain.slice(..plain.len() - pad)
    } else {
        warn!("invalid PKCS#7 padding at the end of sn {}, keeping it", sn);
        plain
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::aes::tests::{encrypt, IV, KEY};
    use crate::crypto::{FallbackDecrypter, SoftwareDecrypter};
    use crate::playlist::EncryptionMethod;
    use pretty_assertions::assert_eq;
    use quickcheck_macros::quickcheck;

    fn metadata() -> DecryptMetadata {
        DecryptMetadata {
            method: EncryptionMethod::Aes128,
            key: Some(KEY),
            iv: Some(IV),
            uri: None,
        }
    }

    fn push_meta(sn: u64, first: bool, final_chunk: bool) -> PushMeta {
        PushMeta {
            sn,
            first,
            final_chunk,
            ..Default::default()
        }
    }

    async fn run(pipeline: &mut DecryptPipeline, chunks: &[&[u8]], sn: u64) -> Vec<u8> {
        let decrypt = metadata();
        let mut out = Vec::new();
        for (i, chunk) in chunks.iter().enumerate() {
            let meta = push_meta(sn, i == 0, i + 1 == chunks.len());
            if let Some(piece) = pipeline
                .push(Bytes::copy_from_slice(chunk), Some(&decrypt), &meta)
                .await
                .unwrap()
            {
                out.extend_from_slice(&piece.data);
            }
        }
        out
    }

    #[tokio::test]
    async fn test_round_trip_in_odd_chunks() {
        let plain: Vec<u8> = (0..5000u32).map(|i| (i * 7) as u8).collect();
        let cipher = encrypt(&plain, KEY, IV);
        let mut pipeline = DecryptPipeline::new(Arc::new(SoftwareDecrypter));

        assert_eq!(run(&mut pipeline, &[&cipher], 1).await, plain);
        let (a, b) = cipher.split_at(1001);
        assert_eq!(run(&mut pipeline, &[a, b], 2).await, plain);
        let pieces: Vec<&[u8]> = cipher.chunks(333).collect();
        assert_eq!(run(&mut pipeline, &pieces, 3).await, plain);
    }

    #[tokio::test]
    async fn test_clear_segments_pass_through_aligned() {
        let mut pipeline = DecryptPipeline::new(Arc::new(SoftwareDecrypter));
        let data = vec![0x47u8; 1000];
        let first = pipeline
            .push(Bytes::from(data.clone()), None, &push_meta(0, true, false))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.data.len(), 752);
        let last = pipeline
            .push(Bytes::from_static(&[0x47; 10]), None, &push_meta(0, false, true))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(last.data.len(), 258);
    }

    #[tokio::test]
    async fn test_new_segment_drops_unfinished_trail() {
        let plain = vec![5u8; 100];
        let cipher = encrypt(&plain, KEY, IV);
        let mut pipeline = DecryptPipeline::new(Arc::new(SoftwareDecrypter));
        let decrypt = metadata();

        // sn 1 never finishes
        let partial = pipeline
            .push(Bytes::from_static(&[1u8; 50]), Some(&decrypt), &push_meta(1, true, false))
            .await
            .unwrap();
        assert!(partial.is_none());

        // a continuation chunk of sn 2 must not inherit sn 1's bytes
        let out = pipeline
            .push(Bytes::from(cipher), Some(&decrypt), &push_meta(2, false, true))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(out.data.to_vec(), plain);
    }

    #[test]
    fn test_missing_key_is_an_error() {
        let mut pipeline = DecryptPipeline::new(Arc::new(FallbackDecrypter::software_only()));
        let decrypt = DecryptMetadata {
            key: None,
            uri: Some(url::Url::parse("https://keys.example/k").unwrap()),
            ..metadata()
        };
        let result = tokio_test::block_on(pipeline.push(
            Bytes::from_static(&[0u8; 32]),
            Some(&decrypt),
            &push_meta(0, true, true),
        ));
        assert!(result.is_err());
    }

    #[quickcheck]
    fn prop_chunking_does_not_change_plaintext(plain: Vec<u8>, cuts: Vec<u16>) -> bool {
        let cipher = encrypt(&plain, KEY, IV);
        let mut pieces: Vec<&[u8]> = Vec::new();
        let mut rest: &[u8] = &cipher;
        for cut in cuts {
            if rest.is_empty() {
                break;
            }
            let (head, tail) = rest.split_at((cut as usize % 1500).min(rest.len()));
            if !head.is_empty() {
                pieces.push(head);
            }
            rest = tail;
        }
        if !rest.is_empty() {
            pieces.push(rest);
        }
        let mut pipeline = DecryptPipeline::new(Arc::new(SoftwareDecrypter));
        tokio_test::block_on(run(&mut pipeline, &pieces, 9)) == plain
    }
}
