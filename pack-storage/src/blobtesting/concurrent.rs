use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::blob::{BlobId, BlobStorage};
use crate::gather::{GatherBytes, WriteBuffer};

const RANGE_GET_OFFSET: u64 = 10;
const RANGE_GET_LENGTH: u64 = 3;

/// Parameters for [`verify_concurrent_access`].
#[derive(Debug, Clone)]
pub struct ConcurrentAccessOptions {
    /// Number of shared blob ids in the pool
    pub num_blobs: usize,

    pub getters: usize,
    pub putters: usize,
    pub deleters: usize,
    pub listers: usize,

    /// Operations issued by each worker
    pub iterations: usize,

    /// 0..=100, probability of issuing a range get instead of a full get
    pub range_get_percentage: u32,
    /// 0..=100, probability of listing with a prefix that matches nothing
    pub non_existent_list_prefix_percentage: u32,
}

impl Default for ConcurrentAccessOptions {
    fn default() -> Self {
        Self {
            num_blobs: 16,
            getters: 4,
            putters: 4,
            deleters: 4,
            listers: 4,
            iterations: 50,
            range_get_percentage: 10,
            non_existent_list_prefix_percentage: 10,
        }
    }
}

/// Drives concurrent getters, putters, deleters and listers against `st` over
/// a shared pool of blob ids and checks that only clean outcomes occur.
///
/// Every operation must either succeed or fail with `NotFound` (get and
/// delete only). A successful get must return bytes consistent with a value
/// some putter wrote. The first violation cancels the remaining workers and is
/// returned.
pub async fn verify_concurrent_access(
    st: Arc<dyn BlobStorage>,
    options: &ConcurrentAccessOptions,
) -> Result<()> {
    if options.num_blobs == 0 {
        bail!("num_blobs must be positive");
    }

    // generate random blob ids for the pool
    let mut rng = StdRng::from_entropy();
    let blobs: Arc<Vec<BlobId>> = Arc::new(
        (0..options.num_blobs)
            .map(|_| {
                let mut id = [0u8; 32];
                rng.fill_bytes(&mut id);
                BlobId::from(hex::encode(id))
            })
            .collect(),
    );

    let cancel = CancellationToken::new();
    let mut workers: JoinSet<Result<()>> = JoinSet::new();

    for _ in 0..options.getters {
        workers.spawn(getter(
            Arc::clone(&st),
            Arc::clone(&blobs),
            options.clone(),
            cancel.clone(),
        ));
    }
    for _ in 0..options.putters {
        workers.spawn(putter(
            Arc::clone(&st),
            Arc::clone(&blobs),
            options.iterations,
            cancel.clone(),
        ));
    }
    for _ in 0..options.deleters {
        workers.spawn(deleter(
            Arc::clone(&st),
            Arc::clone(&blobs),
            options.iterations,
            cancel.clone(),
        ));
    }
    for _ in 0..options.listers {
        workers.spawn(lister(
            Arc::clone(&st),
            Arc::clone(&blobs),
            options.clone(),
            cancel.clone(),
        ));
    }

    let mut first_error = None;
    while let Some(joined) = workers.join_next().await {
        let outcome = joined
            .map_err(|e| anyhow!("worker task failed: {e}"))
            .and_then(|res| res);
        if let Err(e) = outcome {
            if first_error.is_none() {
                debug!(error = %e, "cancelling remaining workers");
                cancel.cancel();
                first_error = Some(e);
            }
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn random_blob_id<'a>(rng: &mut StdRng, blobs: &'a [BlobId]) -> &'a BlobId {
    &blobs[rng.gen_range(0..blobs.len())]
}

async fn getter(
    st: Arc<dyn BlobStorage>,
    blobs: Arc<Vec<BlobId>>,
    options: ConcurrentAccessOptions,
    cancel: CancellationToken,
) -> Result<()> {
    let mut rng = StdRng::from_entropy();
    let mut data = WriteBuffer::new();

    for _ in 0..options.iterations {
        if cancel.is_cancelled() {
            break;
        }

        let blob_id = random_blob_id(&mut rng, &blobs);
        let (offset, length) = if rng.gen_range(0..100) < options.range_get_percentage {
            (RANGE_GET_OFFSET, Some(RANGE_GET_LENGTH))
        } else {
            (0, None)
        };

        match st.get_blob(blob_id, offset, length, &mut data).await {
            Ok(()) => {
                // every value written for an id starts with "<id>-"
                let known_prefix = format!("{blob_id}-");
                let got = data.to_byte_slice();
                let valid = match length {
                    None => got.starts_with(known_prefix.as_bytes()),
                    Some(length) => {
                        let start = offset as usize;
                        let end = start + length as usize;
                        known_prefix.as_bytes().get(start..end) == Some(&got[..])
                    }
                };
                if !valid {
                    bail!(
                        "GetBlob returned invalid data for {blob_id}: {:?}, want a prefix of {known_prefix:?}",
                        String::from_utf8_lossy(&got)
                    );
                }
            }
            Err(e) if e.is_not_found() => {
                // clean error
            }
            Err(e) => {
                return Err(e).with_context(|| format!("GetBlob {blob_id} returned unexpected error"));
            }
        }
    }

    Ok(())
}

async fn putter(
    st: Arc<dyn BlobStorage>,
    blobs: Arc<Vec<BlobId>>,
    iterations: usize,
    cancel: CancellationToken,
) -> Result<()> {
    let mut rng = StdRng::from_entropy();

    for _ in 0..iterations {
        if cancel.is_cancelled() {
            break;
        }

        let blob_id = random_blob_id(&mut rng, &blobs);
        let data = format!("{blob_id}-{}", rng.gen::<i64>());
        st.put_blob(blob_id, GatherBytes::from_slice(data.as_bytes()))
            .await
            .with_context(|| format!("PutBlob {blob_id} returned unexpected error"))?;
    }

    Ok(())
}

async fn deleter(
    st: Arc<dyn BlobStorage>,
    blobs: Arc<Vec<BlobId>>,
    iterations: usize,
    cancel: CancellationToken,
) -> Result<()> {
    let mut rng = StdRng::from_entropy();

    for _ in 0..iterations {
        if cancel.is_cancelled() {
            break;
        }

        let blob_id = random_blob_id(&mut rng, &blobs);
        match st.delete_blob(blob_id).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("DeleteBlob {blob_id} returned unexpected error"));
            }
        }
    }

    Ok(())
}

async fn lister(
    st: Arc<dyn BlobStorage>,
    blobs: Arc<Vec<BlobId>>,
    options: ConcurrentAccessOptions,
    cancel: CancellationToken,
) -> Result<()> {
    let mut rng = StdRng::from_entropy();

    for _ in 0..options.iterations {
        if cancel.is_cancelled() {
            break;
        }

        // list by a random prefix of an existing id, or by one that matches nothing
        let blob_id = random_blob_id(&mut rng, &blobs).as_str();
        let mut prefix = &blob_id[..rng.gen_range(0..blob_id.len())];
        if rng.gen_range(0..100) < options.non_existent_list_prefix_percentage {
            prefix = "zzz";
        }

        st.list_blobs(prefix, &mut |_| Ok(()))
            .await
            .with_context(|| format!("ListBlobs({prefix}) returned unexpected error"))?;
    }

    Ok(())
}
