// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Content digests, stream adapters and compression. */

use {
    crate::error::{Result, RpmRepositoryError},
    async_compression::futures::bufread::{GzipDecoder, GzipEncoder},
    futures::{io::BufReader, AsyncBufRead, AsyncRead, AsyncReadExt},
    pin_project::pin_project,
    std::{
        fmt::Formatter,
        pin::Pin,
        str::FromStr,
        task::{Context, Poll},
    },
};

/// Compression format.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Compression {
    /// No compression.
    None,
    /// Gzip compression.
    Gzip,
}

impl Compression {
    /// Resolve the compression of a repository path from its extension.
    pub fn from_path(path: &str) -> Self {
        if path.ends_with(".gz") {
            Self::Gzip
        } else {
            Self::None
        }
    }
}

/// Wrap a reader with transparent decompression.
pub fn read_decompressed<'a>(
    stream: impl AsyncBufRead + Send + 'a,
    compression: Compression,
) -> Pin<Box<dyn AsyncRead + Send + 'a>> {
    match compression {
        Compression::None => Box::pin(stream),
        Compression::Gzip => Box::pin(GzipDecoder::new(stream)),
    }
}

/// Wrap a reader with transparent compression.
///
/// Gzip output carries no modification time, so identical input yields
/// identical output.
pub fn read_compressed<'a>(
    stream: impl AsyncBufRead + Send + 'a,
    compression: Compression,
) -> Pin<Box<dyn AsyncRead + Send + 'a>> {
    match compression {
        Compression::None => Box::pin(stream),
        Compression::Gzip => Box::pin(GzipEncoder::new(stream)),
    }
}

/// Gzip compress a buffer.
pub async fn gzip_bytes(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut reader = read_compressed(data, Compression::Gzip);
    let mut out = Vec::with_capacity(data.len() / 4);
    reader.read_to_end(&mut out).await?;

    Ok(out)
}

/// Decompress a gzip buffer.
pub async fn gunzip_bytes(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut reader = read_decompressed(data, Compression::Gzip);
    let mut out = Vec::with_capacity(data.len() * 4);
    reader.read_to_end(&mut out).await?;

    Ok(out)
}

/// Drain content from a reader to a black hole.
pub async fn drain_reader(reader: impl AsyncRead) -> std::io::Result<u64> {
    let mut sink = futures::io::sink();
    futures::io::copy(reader, &mut sink).await
}

/// Digest algorithm used for package identity and metadata checksums.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum ChecksumType {
    Sha1,
    Sha256,
}

impl Default for ChecksumType {
    fn default() -> Self {
        Self::Sha256
    }
}

impl std::fmt::Display for ChecksumType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ChecksumType {
    type Err = RpmRepositoryError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sha1" | "sha-1" => Ok(Self::Sha1),
            "sha256" | "sha-256" => Ok(Self::Sha256),
            _ => Err(RpmRepositoryError::UnsupportedDigest(s.to_string())),
        }
    }
}

impl ChecksumType {
    /// The name of this digest as written in `type` attributes of metadata.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Sha1 => "sha1",
            Self::Sha256 => "sha256",
        }
    }

    /// Create a new hasher for this digest.
    pub fn new_hasher(&self) -> Box<dyn digest::DynDigest + Send> {
        match self {
            Self::Sha1 => Box::new(sha1::Sha1::default()),
            Self::Sha256 => Box::new(sha2::Sha256::default()),
        }
    }

    /// Compute the digest of an in-memory buffer.
    pub fn digest_bytes(&self, data: &[u8]) -> ContentDigest {
        let mut hasher = self.new_hasher();
        hasher.update(data);

        ContentDigest::from_parts(*self, hasher.finalize().to_vec())
    }
}

/// Represents a content digest.
#[derive(Clone, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum ContentDigest {
    /// A SHA-1 digest.
    Sha1(Vec<u8>),
    /// A SHA-256 digest.
    Sha256(Vec<u8>),
}

impl std::fmt::Debug for ContentDigest {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sha1(data) => write!(f, "Sha1({})", hex::encode(data)),
            Self::Sha256(data) => write!(f, "Sha256({})", hex::encode(data)),
        }
    }
}

impl ContentDigest {
    fn from_parts(checksum: ChecksumType, digest: Vec<u8>) -> Self {
        match checksum {
            ChecksumType::Sha1 => Self::Sha1(digest),
            ChecksumType::Sha256 => Self::Sha256(digest),
        }
    }

    /// Create a new SHA-1 instance by parsing a hex digest.
    pub fn sha1_hex(digest: &str) -> Result<Self> {
        Self::from_hex_digest(ChecksumType::Sha1, digest)
    }

    /// Create a new SHA-256 instance by parsing a hex digest.
    pub fn sha256_hex(digest: &str) -> Result<Self> {
        Self::from_hex_digest(ChecksumType::Sha256, digest)
    }

    /// Obtain an instance by parsing a hex string as a [ChecksumType].
    pub fn from_hex_digest(checksum: ChecksumType, digest: &str) -> Result<Self> {
        let digest = hex::decode(digest)
            .map_err(|e| RpmRepositoryError::ContentDigestBadHex(digest.to_string(), e))?;

        Ok(Self::from_parts(checksum, digest))
    }

    /// Create a new hasher matching for the type of this digest.
    pub fn new_hasher(&self) -> Box<dyn digest::DynDigest + Send> {
        self.checksum_type().new_hasher()
    }

    /// Obtain the digest bytes for this content digest.
    pub fn digest_bytes(&self) -> &[u8] {
        match self {
            Self::Sha1(x) => x,
            Self::Sha256(x) => x,
        }
    }

    /// Obtain the hex encoded content digest.
    pub fn digest_hex(&self) -> String {
        hex::encode(self.digest_bytes())
    }

    /// Obtain the [ChecksumType] for this digest.
    pub fn checksum_type(&self) -> ChecksumType {
        match self {
            Self::Sha1(_) => ChecksumType::Sha1,
            Self::Sha256(_) => ChecksumType::Sha256,
        }
    }
}

/// An adapter for [AsyncRead] streams that validates source size and digest.
///
/// Validation only occurs once the expected source size bytes have been read.
#[pin_project]
pub struct ContentValidatingReader<R> {
    hasher: Option<Box<dyn digest::DynDigest + Send>>,
    expected_size: u64,
    expected_digest: ContentDigest,
    #[pin]
    source: R,
    bytes_read: u64,
}

impl<R> ContentValidatingReader<R> {
    pub fn new(source: R, expected_size: u64, expected_digest: ContentDigest) -> Self {
        Self {
            hasher: Some(expected_digest.new_hasher()),
            expected_size,
            expected_digest,
            source,
            bytes_read: 0,
        }
    }
}

impl<R> AsyncRead for ContentValidatingReader<R>
where
    R: AsyncRead + Unpin,
{
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut [u8],
    ) -> Poll<std::io::Result<usize>> {
        let mut this = self.project();

        match this.source.as_mut().poll_read(cx, buf) {
            Poll::Ready(Ok(size)) => {
                if size > 0 {
                    if let Some(hasher) = this.hasher.as_mut() {
                        hasher.update(&buf[0..size]);
                    }

                    *this.bytes_read += size as u64;
                }

                match this.bytes_read.cmp(&this.expected_size) {
                    std::cmp::Ordering::Equal => {
                        if let Some(hasher) = this.hasher.take() {
                            let got_digest = hasher.finalize();

                            if got_digest.as_ref() != this.expected_digest.digest_bytes() {
                                return Poll::Ready(Err(std::io::Error::new(
                                    std::io::ErrorKind::Other,
                                    format!(
                                        "digest mismatch of retrieved content: expected {}, got {}",
                                        this.expected_digest.digest_hex(),
                                        hex::encode(got_digest)
                                    ),
                                )));
                            }
                        }
                    }
                    std::cmp::Ordering::Greater => {
                        return Poll::Ready(Err(std::io::Error::new(
                            std::io::ErrorKind::Other,
                            format!(
                                "extra bytes read: expected {}; got {}",
                                this.expected_size, this.bytes_read
                            ),
                        )));
                    }
                    std::cmp::Ordering::Less => {
                        if size == 0 {
                            return Poll::Ready(Err(std::io::Error::new(
                                std::io::ErrorKind::UnexpectedEof,
                                format!(
                                    "content truncated: expected {} bytes; got {}",
                                    this.expected_size, this.bytes_read
                                ),
                            )));
                        }
                    }
                }

                Poll::Ready(Ok(size))
            }
            res => res,
        }
    }
}

/// An [AsyncRead] stream adapter that computes a [ContentDigest] and size as data is read.
#[pin_project]
pub struct DigestingReader<R> {
    checksum: ChecksumType,
    hasher: Box<dyn digest::DynDigest + Send>,
    bytes_read: u64,
    #[pin]
    source: R,
}

impl<R> DigestingReader<R> {
    /// Construct a new instance from a source reader.
    pub fn new(source: R, checksum: ChecksumType) -> Self {
        Self {
            checksum,
            hasher: checksum.new_hasher(),
            bytes_read: 0,
            source,
        }
    }

    /// Finish the stream.
    ///
    /// Returns the source reader, the digest of all content read and its size.
    pub fn finish(self) -> (R, ContentDigest, u64) {
        let digest = ContentDigest::from_parts(self.checksum, self.hasher.finalize().to_vec());

        (self.source, digest, self.bytes_read)
    }
}

impl<R> AsyncRead for DigestingReader<R>
where
    R: AsyncRead + Unpin,
{
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut [u8],
    ) -> Poll<std::io::Result<usize>> {
        let mut this = self.project();

        match this.source.as_mut().poll_read(cx, buf) {
            Poll::Ready(Ok(size)) => {
                if size > 0 {
                    this.hasher.update(&buf[0..size]);
                    *this.bytes_read += size as u64;
                }

                Poll::Ready(Ok(size))
            }
            res => res,
        }
    }
}

/// A blocking [std::io::Read] over an [AsyncRead] stream.
///
/// Only use this on threads that are allowed to block, such as those of
/// [tokio::task::spawn_blocking].
pub struct BlockingReader<R>(R);

impl<R> BlockingReader<R> {
    pub fn new(source: R) -> Self {
        Self(source)
    }

    pub fn into_inner(self) -> R {
        self.0
    }
}

impl<R> std::io::Read for BlockingReader<R>
where
    R: AsyncRead + Unpin,
{
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        futures::executor::block_on(self.0.read(buf))
    }
}

/// Compute the digest and size of everything a reader emits.
pub async fn digest_reader(
    reader: impl AsyncRead + Unpin,
    checksum: ChecksumType,
) -> std::io::Result<(ContentDigest, u64)> {
    let mut reader = DigestingReader::new(BufReader::new(reader), checksum);
    drain_reader(&mut reader).await?;

    let (_, digest, size) = reader.finish();

    Ok((digest, size))
}
