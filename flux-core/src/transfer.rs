/// Import/export of raw collection files
///
/// Exported files are byte copies of the collection file, so they can be
/// imported into any store under any collection name.

use crate::buffer::WriteBuffer;
use crate::collection::CollectionStore;
use crate::index::IndexStore;
use crate::Result;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use tracing::{debug, info};

/// Copy a collection's file to `output`, flushing its buffer first.
///
/// Returns false if the collection does not exist.
pub fn export_collection(
    store: &CollectionStore,
    buffer: &mut WriteBuffer,
    collection: &str,
    output: &Path,
) -> Result<bool> {
    if !store.exists(collection)? {
        return Ok(false);
    }
    buffer.flush(collection, store)?;

    let Some(bytes) = store.read_bytes(collection)? else {
        return Ok(false);
    };
    fs::write(output, &bytes).map_err(|e| {
        crate::Error::from(e).with_context(&format!("export of {} to {}", collection, output.display()))
    })?;

    info!("Exported collection {} ({} bytes) to {}", collection, bytes.len(), output.display());
    Ok(true)
}

/// Replace a collection's file with the bytes of `input` and rebuild its
/// index from the imported records.
///
/// Returns false if `input` does not exist. Unflushed buffered records of
/// the destination are discarded.
pub fn import_collection(
    store: &CollectionStore,
    buffer: &mut WriteBuffer,
    index: &mut IndexStore,
    collection: &str,
    input: &Path,
) -> Result<bool> {
    let bytes = match fs::read(input) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
        Err(e) => {
            return Err(crate::Error::from(e)
                .with_context(&format!("import of {} from {}", collection, input.display())))
        }
    };

    store.replace_bytes(collection, &bytes)?;
    let discarded = buffer.discard(collection);
    if discarded > 0 {
        debug!("Discarded {} buffered records of {} on import", discarded, collection);
    }

    let records = store.scan_all(collection)?;
    index.rebuild(collection, &records)?;

    info!("Imported {} records into collection {} from {}", records.len(), collection, input.display());
    Ok(true)
}
