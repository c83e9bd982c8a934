use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{CfError, CfResult};
use crate::rating::Rating;
use crate::store::RatingStore;

const SNAPSHOT_VERSION: u32 = 1;

/// On-disk form of a store: raw ratings only. Profiles and similarities are
/// caches and get rebuilt after loading.
#[derive(Serialize, Deserialize)]
struct StoreSnapshot {
    version: u32,
    ratings: Vec<Rating>,
}

fn build_model_path(path: &Path, model_name: &str) -> PathBuf {
    let file_name = format!("{model_name}.gz");
    path.join(file_name)
}

pub fn save_store<P: AsRef<Path>>(store: &RatingStore, path: P, model_name: &str) -> CfResult<PathBuf> {
    let model_path = build_model_path(path.as_ref(), model_name);
    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(model_path.as_path())?;

    let snapshot = StoreSnapshot {
        version: SNAPSHOT_VERSION,
        ratings: store.ratings().collect(),
    };
    let model_bytes: Vec<u8> = bincode::serialize(&snapshot)
        .map_err(|e| CfError::Serialization(format!("failed to serialize ratings: {e}")))?;

    let mut encoder = GzEncoder::new(file, Compression::new(1));
    encoder.write_all(&model_bytes)?;
    encoder.finish()?;

    info!(
        ratings = snapshot.ratings.len(),
        "saved rating store to `{}`",
        model_path.display()
    );
    Ok(model_path)
}

/// Load a snapshot into a fresh store.
pub fn load_store<P: AsRef<Path>>(path: P, model_name: &str) -> CfResult<RatingStore> {
    let mut store = RatingStore::new();
    load_into(&mut store, path, model_name)?;
    Ok(store)
}

/// Replace the contents of `store` with a snapshot, notifying its observers.
pub fn load_into<P: AsRef<Path>>(store: &mut RatingStore, path: P, model_name: &str) -> CfResult<()> {
    let model_path = build_model_path(path.as_ref(), model_name);
    if !model_path.exists() {
        return Err(CfError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("model file not found: {}", model_path.display()),
        )));
    }

    let file = File::open(model_path.as_path())?;
    let mut decoder = GzDecoder::new(file);
    let mut model_bytes: Vec<u8> = Vec::new();
    decoder.read_to_end(&mut model_bytes)?;

    let snapshot: StoreSnapshot = bincode::deserialize(&model_bytes)
        .map_err(|e| CfError::Serialization(format!("failed to deserialize ratings: {e}")))?;
    if snapshot.version != SNAPSHOT_VERSION {
        return Err(CfError::Serialization(format!(
            "unsupported snapshot version {}",
            snapshot.version
        )));
    }

    store.clear();
    let report = store.load_ratings(snapshot.ratings);
    info!(
        ratings = report.accepted,
        "loaded rating store from `{}`",
        model_path.display()
    );
    Ok(())
}
