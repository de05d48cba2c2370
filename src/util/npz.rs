//! Named `f32` array archives (`.npz`), used for the mean image, pretrained
//! parameters and checkpoints.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use ndarray::ArrayD;
use ndarray_npy::{NpzReader, NpzWriter};

use crate::error::Result;

/// Reads every array of the archive, keyed by name without the `.npy` suffix.
pub fn read_all(path: impl AsRef<Path>) -> Result<BTreeMap<String, ArrayD<f32>>> {
    let mut npz = NpzReader::new(BufReader::new(File::open(path.as_ref())?))?;
    let mut arrays = BTreeMap::new();
    for name in npz.names()? {
        let array: ArrayD<f32> = npz.by_name(&name)?;
        let key = name.strip_suffix(".npy").unwrap_or(&name).to_owned();
        arrays.insert(key, array);
    }
    Ok(arrays)
}

/// Reads one array, accepting the name with or without the `.npy` suffix.
pub fn read_one(path: impl AsRef<Path>, name: &str) -> Result<Option<ArrayD<f32>>> {
    Ok(read_all(path)?.remove(name))
}

pub fn write_all<'a>(
    path: impl AsRef<Path>,
    arrays: impl IntoIterator<Item = (&'a str, &'a ArrayD<f32>)>,
) -> Result<()> {
    let mut npz = NpzWriter::new_compressed(BufWriter::new(File::create(path.as_ref())?));
    for (name, array) in arrays {
        npz.add_array(name, array)?;
    }
    npz.finish()?;
    Ok(())
}
