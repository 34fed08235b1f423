//! Binary PGM (`P5`) boards on disk.
//!
//! A pixel of 255 is a live cell, anything else is dead. Exports go through a
//! single writer task so they land in the order they were queued.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info};

use super::{GridInput, GridOutput};
use crate::engine::World;
use crate::error::{GolError, GolResult};

const ALIVE: u8 = 255;

enum WriteJob {
    Export { path: PathBuf, bytes: Vec<u8> },
    Flush(oneshot::Sender<()>),
}

pub struct PgmStore {
    images_dir: PathBuf,
    out_dir: PathBuf,
    jobs: mpsc::UnboundedSender<WriteJob>,
}

impl PgmStore {
    /// Must be called inside a tokio runtime; the writer task is spawned here.
    pub fn new(images_dir: impl Into<PathBuf>, out_dir: impl Into<PathBuf>) -> Self {
        let (jobs, rx) = mpsc::unbounded_channel();
        tokio::spawn(write_loop(rx));
        PgmStore {
            images_dir: images_dir.into(),
            out_dir: out_dir.into(),
            jobs,
        }
    }

    pub fn input_path(&self, name: &str) -> PathBuf {
        self.images_dir.join(format!("{}.pgm", name))
    }

    pub fn output_path(&self, name: &str) -> PathBuf {
        self.out_dir.join(format!("{}.pgm", name))
    }

    fn queue(&self, job: WriteJob) -> GolResult<()> {
        self.jobs
            .send(job)
            .map_err(|_| GolError::Image("writer task has stopped".to_string()))
    }
}

async fn write_loop(mut jobs: mpsc::UnboundedReceiver<WriteJob>) {
    while let Some(job) = jobs.recv().await {
        match job {
            WriteJob::Export { path, bytes } => {
                if let Err(e) = write_file(&path, &bytes).await {
                    error!("[PgmStore] Failed to write {}: {}", path.display(), e);
                } else {
                    info!("🖼️ [PgmStore] Wrote {}", path.display());
                }
            }
            WriteJob::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    debug!("[PgmStore] Writer stopped");
}

async fn write_file(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, bytes).await
}

pub fn encode(world: &World) -> Vec<u8> {
    let mut bytes = format!("P5\n{} {}\n255\n", world.width, world.height).into_bytes();
    bytes.reserve(world.width * world.height);
    for row in &world.cells {
        bytes.extend(row.iter().map(|&alive| if alive { ALIVE } else { 0 }));
    }
    bytes
}

/// Header tokens are whitespace separated; `#` starts a comment running to the
/// end of the line. Exactly one whitespace byte separates maxval from pixels.
pub fn decode(bytes: &[u8]) -> GolResult<World> {
    let mut pos = 0;
    let mut fields = [0usize; 3];

    let magic = next_token(bytes, &mut pos)?;
    if magic != b"P5" {
        return Err(GolError::Image("not a binary PGM (expected P5)".to_string()));
    }
    for field in fields.iter_mut() {
        let token = next_token(bytes, &mut pos)?;
        *field = std::str::from_utf8(token)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| {
                GolError::Image(format!("bad header field {:?}", String::from_utf8_lossy(token)))
            })?;
    }
    let [width, height, maxval] = fields;
    if maxval == 0 || maxval > 255 {
        return Err(GolError::Image(format!("unsupported maxval {}", maxval)));
    }
    let size = width
        .checked_mul(height)
        .ok_or_else(|| GolError::Image("dimensions overflow".to_string()))?;
    pos += 1;

    let pixels = bytes
        .get(pos..)
        .filter(|p| p.len() >= size)
        .ok_or_else(|| GolError::Image(format!("expected {} pixels", size)))?;

    let cells = (0..height)
        .map(|y| {
            pixels[y * width..(y + 1) * width]
                .iter()
                .map(|&p| p == ALIVE)
                .collect()
        })
        .collect();
    Ok(World {
        width,
        height,
        cells,
    })
}

fn next_token<'a>(bytes: &'a [u8], pos: &mut usize) -> GolResult<&'a [u8]> {
    loop {
        match bytes.get(*pos) {
            Some(b'#') => {
                while bytes.get(*pos).map_or(false, |&b| b != b'\n') {
                    *pos += 1;
                }
            }
            Some(b) if b.is_ascii_whitespace() => *pos += 1,
            Some(_) => break,
            None => return Err(GolError::Image("truncated header".to_string())),
        }
    }
    let start = *pos;
    while bytes.get(*pos).map_or(false, |b| !b.is_ascii_whitespace()) {
        *pos += 1;
    }
    Ok(&bytes[start..*pos])
}

#[async_trait]
impl GridInput for PgmStore {
    async fn load(&self, name: &str, width: usize, height: usize) -> GolResult<World> {
        let path = self.input_path(name);
        let bytes = tokio::fs::read(&path).await?;
        let world = decode(&bytes)?;
        if world.width != width || world.height != height {
            return Err(GolError::Image(format!(
                "{} is {}x{}, expected {}x{}",
                path.display(),
                world.width,
                world.height,
                width,
                height
            )));
        }
        info!("[PgmStore] Loaded {}", path.display());
        Ok(world)
    }
}

#[async_trait]
impl GridOutput for PgmStore {
    async fn export(&self, name: &str, world: &World) -> GolResult<()> {
        self.queue(WriteJob::Export {
            path: self.output_path(name),
            bytes: encode(world),
        })
    }

    async fn wait_idle(&self) -> GolResult<()> {
        let (done, flushed) = oneshot::channel();
        self.queue(WriteJob::Flush(done))?;
        flushed
            .await
            .map_err(|_| GolError::Image("writer task has stopped".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Cell;

    fn scratch_dir(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!("gol-pgm-{}-{}", tag, std::process::id()))
    }

    #[test]
    fn decode_reads_live_pixels_row_major() {
        let mut bytes = b"P5\n3 2\n255\n".to_vec();
        bytes.extend([0, 255, 0, 255, 0, 0]);
        let world = decode(&bytes).unwrap();
        assert_eq!(world.alive_cells(), vec![Cell::new(1, 0), Cell::new(0, 1)]);
    }

    #[test]
    fn decode_skips_header_comments() {
        let mut bytes = b"P5\n# made by hand\n2 2 # size\n255\n".to_vec();
        bytes.extend([255, 0, 0, 255]);
        let world = decode(&bytes).unwrap();
        assert_eq!((world.width, world.height), (2, 2));
        assert_eq!(world.alive_cells(), vec![Cell::new(0, 0), Cell::new(1, 1)]);
    }

    #[test]
    fn decode_rejects_bad_input() {
        assert!(matches!(decode(b"P2\n2 2\n255\n0000"), Err(GolError::Image(_))));
        assert!(matches!(decode(b"P5\n2 2\n255\n\x00"), Err(GolError::Image(_))));
        assert!(matches!(decode(b"P5\n2"), Err(GolError::Image(_))));
        assert!(matches!(decode(b"P5\nx 2\n255\n"), Err(GolError::Image(_))));
        assert!(matches!(
            decode(b"P5\n18446744073709551615 2\n255\n\x00"),
            Err(GolError::Image(_))
        ));
        assert!(matches!(
            decode(b"P5\n4294967296 4294967296\n255\n\x00"),
            Err(GolError::Image(_))
        ));
    }

    #[tokio::test]
    async fn export_then_load_from_the_same_directory() {
        let dir = scratch_dir("store");
        let store = PgmStore::new(&dir, &dir);
        let world = World::with_alive(4, 3, &[Cell::new(3, 0), Cell::new(1, 2)]);

        store.export("4x3", &world).await.unwrap();
        store.wait_idle().await.unwrap();
        assert!(store.output_path("4x3").exists());

        assert_eq!(store.load("4x3", 4, 3).await.unwrap(), world);
        assert!(matches!(store.load("4x3", 3, 4).await, Err(GolError::Image(_))));
        assert!(matches!(store.load("9x9", 9, 9).await, Err(GolError::Io(_))));

        let _ = std::fs::remove_dir_all(&dir);
    }
}
