//! Shared fixtures for the integration tests. Everything is generated
//! in-process, no external codec is needed.

#![allow(dead_code)]

use image::{DynamicImage, Rgb, RgbImage};
use space_file_optimizer::image_processor::encode_png;
use space_file_optimizer::{Config, FileOptimizer, FileReference, HistoryStore, PlatformCommands};
use std::path::Path;
use std::sync::Arc;

pub fn optimizer() -> FileOptimizer {
    optimizer_with(Config::default())
}

pub fn optimizer_with(config: Config) -> FileOptimizer {
    FileOptimizer::with_history(config, PlatformCommands::default(), Arc::new(HistoryStore::in_memory(68)))
        .expect("config is valid")
}

/// Entries left in `dir`
pub fn leftovers(dir: &Path) -> Vec<String> {
    std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect()
}

/// Deterministic noise, so lossy encoders have something to throw away
pub fn noisy_image(width: u32, height: u32) -> DynamicImage {
    let mut seed = 0x9E37_79B9u32;
    DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
        seed ^= seed << 13;
        seed ^= seed >> 17;
        seed ^= seed << 5;
        Rgb([(x * 3) as u8 ^ seed as u8, (y * 5) as u8, (seed >> 8) as u8])
    }))
}

pub async fn png_file(dir: &Path, name: &str, width: u32, height: u32) -> FileReference {
    let path = dir.join(name);
    std::fs::write(&path, encode_png(&noisy_image(width, height)).unwrap()).unwrap();
    FileReference::open(&path).await.unwrap()
}

/// Just enough of an MP4 header to be classified as video
pub async fn fake_video(dir: &Path, name: &str) -> FileReference {
    let path = dir.join(name);
    let mut bytes = b"\0\0\0\x18ftypisom\0\0\x02\0isomiso2".to_vec();
    bytes.resize(512, 0);
    std::fs::write(&path, bytes).unwrap();
    FileReference::open(&path).await.unwrap()
}

/// MediaBox width of every page, in page order
pub fn page_widths(pdf: &[u8]) -> Vec<f64> {
    let doc = lopdf::Document::load_mem(pdf).unwrap();
    doc.get_pages()
        .values()
        .map(|id| {
            let page = doc.get_dictionary(*id).unwrap();
            let media_box = page.get(b"MediaBox").unwrap().as_array().unwrap();
            match &media_box[2] {
                lopdf::Object::Integer(i) => *i as f64,
                lopdf::Object::Real(r) => *r as f64,
                other => panic!("unexpected MediaBox entry {:?}", other),
            }
        })
        .collect()
}
