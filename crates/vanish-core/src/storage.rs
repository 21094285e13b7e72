use std::path::PathBuf;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// On-disk blob storage for uploaded files.
///
/// Each blob is a flat file at `{dir}/{uuid}`. Callers only ever see the
/// generated name, so user-supplied filenames never reach the filesystem.
pub struct Storage {
    dir: PathBuf,
}

impl Storage {
    pub async fn new(dir: PathBuf) -> std::io::Result<Self> {
        fs::create_dir_all(&dir).await?;
        info!("Blob storage directory: {}", dir.display());
        Ok(Self { dir })
    }

    /// Resolve a blob name to its path. Names that could escape the storage
    /// directory are rejected.
    pub fn file_path(&self, blob: &str) -> std::io::Result<PathBuf> {
        if blob.parse::<Uuid>().is_err() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("invalid blob name: {}", blob),
            ));
        }
        Ok(self.dir.join(blob))
    }

    /// Store a complete buffer. Returns the blob name.
    pub async fn put(&self, data: &[u8]) -> std::io::Result<String> {
        let blob = Uuid::new_v4().to_string();
        let path = self.dir.join(&blob);
        let mut file = fs::File::create(&path).await?;
        file.write_all(data).await?;
        file.flush().await?;
        Ok(blob)
    }

    /// Stream a body into a new blob. Returns `(blob name, bytes written)`.
    ///
    /// A partially written blob is removed before the error is returned.
    pub async fn put_stream<S, E>(&self, mut stream: S) -> std::io::Result<(String, u64)>
    where
        S: Stream<Item = Result<Bytes, E>> + Unpin,
        E: std::fmt::Display,
    {
        let blob = Uuid::new_v4().to_string();
        let path = self.dir.join(&blob);
        let mut file = fs::File::create(&path).await?;
        let mut written: u64 = 0;

        let result: std::io::Result<()> = async {
            while let Some(chunk) = stream.next().await {
                let chunk = chunk.map_err(|e| std::io::Error::other(e.to_string()))?;
                file.write_all(&chunk).await?;
                written += chunk.len() as u64;
            }
            file.flush().await
        }
        .await;

        if let Err(e) = result {
            drop(file);
            self.delete(&blob).await.ok();
            return Err(e);
        }

        debug!("Stored blob {} ({} bytes)", blob, written);
        Ok((blob, written))
    }

    /// Open a blob for reading.
    pub async fn open(&self, blob: &str) -> std::io::Result<fs::File> {
        fs::File::open(self.file_path(blob)?).await
    }

    /// Delete a blob. A blob that is already gone is not an error.
    pub async fn delete(&self, blob: &str) -> std::io::Result<()> {
        let path = self.file_path(blob)?;
        match fs::remove_file(&path).await {
            Ok(()) => {
                info!("Deleted blob {}", blob);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Blob {} already gone", blob);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Whether a blob is still on disk.
    pub async fn exists(&self, blob: &str) -> bool {
        match self.file_path(blob) {
            Ok(path) => fs::try_exists(path).await.unwrap_or(false),
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_open_delete() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(dir.path().to_path_buf()).await.unwrap();

        let blob = storage.put(b"hello blob").await.unwrap();
        assert!(storage.exists(&blob).await);

        let bytes = tokio::fs::read(storage.file_path(&blob).unwrap()).await.unwrap();
        assert_eq!(bytes, b"hello blob");

        storage.delete(&blob).await.unwrap();
        assert!(!storage.exists(&blob).await);
        // second delete is a no-op
        storage.delete(&blob).await.unwrap();
    }

    #[tokio::test]
    async fn put_stream_counts_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(dir.path().to_path_buf()).await.unwrap();

        let chunks: Vec<Result<Bytes, std::io::Error>> =
            vec![Ok(Bytes::from_static(b"abc")), Ok(Bytes::from_static(b"defg"))];
        let (blob, size) = storage
            .put_stream(futures_util::stream::iter(chunks))
            .await
            .unwrap();
        assert_eq!(size, 7);
        assert!(storage.exists(&blob).await);
    }

    #[tokio::test]
    async fn failed_stream_leaves_no_blob() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(dir.path().to_path_buf()).await.unwrap();

        let chunks: Vec<Result<Bytes, String>> =
            vec![Ok(Bytes::from_static(b"abc")), Err("connection reset".to_string())];
        let result = storage.put_stream(futures_util::stream::iter(chunks)).await;
        assert!(result.is_err());

        let mut entries = tokio::fs::read_dir(dir.path()).await.unwrap();
        assert!(entries.next_entry().await.unwrap().is_none());
    }

    #[test]
    fn rejects_traversal() {
        let storage = Storage { dir: PathBuf::from("/tmp/vanish") };
        assert!(storage.file_path("../etc/passwd").is_err());
        assert!(storage.file_path(&Uuid::new_v4().to_string()).is_ok());
    }
}
