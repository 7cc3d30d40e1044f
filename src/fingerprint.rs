// SPDX-License-Identifier: EUPL-1.2

//! Fingerprint extraction: content hash, perceptual hash and watermark recovery.
//!
//! The perceptual hash is a 64-bit block-average hash. Media is reduced to an
//! 8×8 grid of block means (a luminance raster when one is available, the raw
//! byte stream as a 1-D signal otherwise) and each bit records whether its
//! block is at or above the grid mean. Resizing and recompression move block
//! means only slightly, so near-duplicates keep most bits.

use regex::bytes::Regex;
use sha2::{Digest, Sha256};
use std::sync::OnceLock;
use uuid::Uuid;

use crate::models::AssetFingerprint;

const GRID: usize = 8;
const BITS: usize = GRID * GRID;

/// Decoded 8-bit luminance samples, row-major.
#[derive(Debug, Clone, Copy)]
pub struct Raster<'a> {
    pub width: usize,
    pub height: usize,
    pub luma: &'a [u8],
}

/// Media handed to the extractor.
#[derive(Debug, Clone, Copy)]
pub struct Media<'a> {
    pub bytes: &'a [u8],
    pub raster: Option<Raster<'a>>,
}

impl<'a> Media<'a> {
    pub fn from_bytes(bytes: &'a [u8]) -> Self {
        Self {
            bytes,
            raster: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatermarkOutcome {
    Found(String),
    NotFound,
}

impl WatermarkOutcome {
    pub fn into_option(self) -> Option<String> {
        match self {
            WatermarkOutcome::Found(id) => Some(id),
            WatermarkOutcome::NotFound => None,
        }
    }
}

/// Derive the full fingerprint of a piece of media.
pub fn extract(asset_id: Uuid, media: &Media<'_>) -> AssetFingerprint {
    AssetFingerprint {
        asset_id,
        content_hash: content_hash(media.bytes),
        perceptual_hash: perceptual_hash(media),
        watermark_id: recover_watermark(media.bytes).into_option(),
    }
}

/// SHA-256 of the raw bytes, lowercase hex.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

pub fn perceptual_hash(media: &Media<'_>) -> String {
    let blocks = match media.raster {
        Some(r) if r.width > 0 && r.height > 0 && r.luma.len() >= r.width * r.height => {
            raster_blocks(&r)
        }
        _ => signal_blocks(media.bytes),
    };
    match blocks {
        Some(means) => format!("{:016x}", average_hash(&means)),
        None => "0".repeat(BITS / 4),
    }
}

fn average_hash(means: &[f64; BITS]) -> u64 {
    let global = means.iter().sum::<f64>() / BITS as f64;
    means
        .iter()
        .enumerate()
        .filter(|(_, m)| **m >= global)
        .fold(0u64, |acc, (i, _)| acc | 1 << (BITS - 1 - i))
}

/// Half-open span `[start, end)` of cell `i` out of `GRID`/`BITS` cells over `len`.
/// Every cell gets at least one sample so short inputs still hash.
fn span(i: usize, cells: usize, len: usize) -> (usize, usize) {
    let start = (i * len / cells).min(len - 1);
    let end = ((i + 1) * len / cells).max(start + 1).min(len);
    (start, end)
}

fn raster_blocks(r: &Raster<'_>) -> Option<[f64; BITS]> {
    let mut means = [0f64; BITS];
    for by in 0..GRID {
        let (y0, y1) = span(by, GRID, r.height);
        for bx in 0..GRID {
            let (x0, x1) = span(bx, GRID, r.width);
            let mut sum = 0u64;
            for y in y0..y1 {
                let row = &r.luma[y * r.width..(y + 1) * r.width];
                sum += row[x0..x1].iter().map(|&v| u64::from(v)).sum::<u64>();
            }
            means[by * GRID + bx] = sum as f64 / ((y1 - y0) * (x1 - x0)) as f64;
        }
    }
    Some(means)
}

fn signal_blocks(bytes: &[u8]) -> Option<[f64; BITS]> {
    if bytes.is_empty() {
        return None;
    }
    let mut means = [0f64; BITS];
    for (i, mean) in means.iter_mut().enumerate() {
        let (start, end) = span(i, BITS, bytes.len());
        let sum: u64 = bytes[start..end].iter().map(|&v| u64::from(v)).sum();
        *mean = sum as f64 / (end - start) as f64;
    }
    Some(means)
}

fn watermark_marker() -> Option<&'static Regex> {
    static MARKER: OnceLock<Option<Regex>> = OnceLock::new();
    MARKER
        .get_or_init(|| Regex::new(r"SGWM:([A-Za-z0-9_-]{6,64})").ok())
        .as_ref()
}

/// Best-effort watermark recovery. Malformed or truncated input is simply `NotFound`.
pub fn recover_watermark(bytes: &[u8]) -> WatermarkOutcome {
    let Some(marker) = watermark_marker() else {
        return WatermarkOutcome::NotFound;
    };
    marker
        .captures(bytes)
        .and_then(|c| c.get(1))
        .map(|m| WatermarkOutcome::Found(String::from_utf8_lossy(m.as_bytes()).into_owned()))
        .unwrap_or(WatermarkOutcome::NotFound)
}
