//! Centralized download functionality.
//!
//! OS images and the firmware clone both come through here for consistent
//! retry behavior, resume support, and progress reporting.

use anyhow::{bail, Context, Result};
use std::path::Path;
use std::time::Duration;

pub use checksum::{file_sha256, verify_sha256};

/// Download configuration options.
#[derive(Debug, Clone)]
pub struct DownloadOptions {
    /// Request timeout (none for large files).
    pub timeout: Option<Duration>,
    /// Number of retry attempts for transient failures.
    pub retries: u32,
    /// Delay between retries, doubles each retry.
    pub retry_delay: Duration,
    /// Whether to show progress.
    pub show_progress: bool,
    /// Rough expected size in bytes, for progress when the server sends
    /// no content length.
    pub expected_size: Option<u64>,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            timeout: None,
            retries: 3,
            retry_delay: Duration::from_secs(2),
            show_progress: true,
            expected_size: None,
        }
    }
}

impl DownloadOptions {
    /// Large file download with an approximate size.
    pub fn large_file(size_bytes: u64) -> Self {
        Self {
            retry_delay: Duration::from_secs(5),
            expected_size: Some(size_bytes),
            ..Self::default()
        }
    }
}

/// Progress information for the in-place progress line.
#[derive(Debug, Clone)]
pub struct Progress {
    pub downloaded: u64,
    pub total: Option<u64>,
    pub percent: Option<u8>,
}

impl Progress {
    fn new(downloaded: u64, total: Option<u64>) -> Self {
        let percent = total.map(|t| {
            if t > 0 {
                ((downloaded * 100) / t).min(100) as u8
            } else {
                0
            }
        });
        Self {
            downloaded,
            total,
            percent,
        }
    }

    pub fn display(&self) -> String {
        let downloaded_mb = self.downloaded as f64 / (1024.0 * 1024.0);
        match (self.total, self.percent) {
            (Some(total), Some(pct)) => {
                let total_mb = total as f64 / (1024.0 * 1024.0);
                format!("{:.1}/{:.1} MB ({}%)", downloaded_mb, total_mb, pct)
            }
            _ => format!("{:.1} MB", downloaded_mb),
        }
    }
}

// =============================================================================
// HTTP Downloads
// =============================================================================

/// Download a file via HTTP with resume support and retries.
pub async fn http(url: &str, dest: &Path, options: &DownloadOptions) -> Result<()> {
    let client = reqwest::Client::builder()
        .user_agent("pimedia/0.1")
        .build()
        .context("Failed to create HTTP client")?;

    let mut last_error = None;
    let mut attempt = 0;

    while attempt <= options.retries {
        if attempt > 0 {
            // Exponential backoff, capped at 16x
            let delay = options.retry_delay * (1 << (attempt - 1).min(4));
            if options.show_progress {
                println!("    Retry {}/{} in {:?}...", attempt, options.retries, delay);
            }
            tokio::time::sleep(delay).await;
        }
        attempt += 1;

        match http_attempt(&client, url, dest, options).await {
            Ok(()) => return Ok(()),
            Err(e) => {
                if !is_retryable_error(&e) || attempt > options.retries {
                    return Err(e);
                }
                last_error = Some(e);
            }
        }
    }

    Err(last_error
        .unwrap_or_else(|| anyhow::anyhow!("Download failed after {} retries", options.retries)))
}

/// Single HTTP download attempt.
async fn http_attempt(
    client: &reqwest::Client,
    url: &str,
    dest: &Path,
    options: &DownloadOptions,
) -> Result<()> {
    use tokio::io::AsyncWriteExt;

    // Check for partial download to resume
    let mut start_byte = if dest.exists() {
        std::fs::metadata(dest).map(|m| m.len()).unwrap_or(0)
    } else {
        0
    };

    let mut request = client.get(url);
    if let Some(timeout) = options.timeout {
        request = request.timeout(timeout);
    }
    let requested_resume = start_byte > 0;
    if requested_resume {
        request = request.header("Range", format!("bytes={}-", start_byte));
        if options.show_progress {
            println!("    Resuming from {} bytes", start_byte);
        }
    }

    let response = request
        .send()
        .await
        .with_context(|| format!("HTTP request failed: {}", url))?;

    let status = response.status();
    if !status.is_success() && status != reqwest::StatusCode::PARTIAL_CONTENT {
        bail!(
            "HTTP {} for {}: {}",
            status.as_u16(),
            url,
            status.canonical_reason().unwrap_or("Unknown error")
        );
    }

    // A 200 OK answer to a Range request means the server doesn't support
    // resume; appending would corrupt the file, so start fresh.
    if requested_resume && status == reqwest::StatusCode::OK {
        if options.show_progress {
            println!("    Server doesn't support resume, starting fresh");
        }
        start_byte = 0;
    }

    let content_length = response.content_length();
    let total_size = content_length
        .map(|len| len + start_byte)
        .or(options.expected_size);

    let file = if start_byte > 0 && status == reqwest::StatusCode::PARTIAL_CONTENT {
        tokio::fs::OpenOptions::new()
            .append(true)
            .open(dest)
            .await
            .with_context(|| format!("Failed to open {} for append", dest.display()))?
    } else {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }
        tokio::fs::File::create(dest)
            .await
            .with_context(|| format!("Failed to create {}", dest.display()))?
    };
    let mut writer = tokio::io::BufWriter::new(file);

    let mut downloaded = start_byte;
    let mut last_percent = 0u8;
    let mut stream = response.bytes_stream();

    use futures_util::StreamExt;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.with_context(|| format!("Failed to read chunk from {}", url))?;
        writer
            .write_all(&chunk)
            .await
            .with_context(|| format!("Failed to write to {}", dest.display()))?;
        downloaded += chunk.len() as u64;

        if options.show_progress {
            let progress = Progress::new(downloaded, total_size);
            if let Some(pct) = progress.percent {
                if pct > last_percent {
                    print!("\r    {}", progress.display());
                    use std::io::Write;
                    std::io::stdout().flush().ok();
                    last_percent = pct;
                }
            }
        }
    }

    writer
        .flush()
        .await
        .with_context(|| format!("Failed to flush {}", dest.display()))?;

    if options.show_progress {
        println!();
    }

    Ok(())
}

/// Check if an error is likely transient and worth retrying.
fn is_retryable_error(e: &anyhow::Error) -> bool {
    let msg = e.to_string().to_lowercase();
    msg.contains("timeout")
        || msg.contains("connection reset")
        || msg.contains("connection refused")
        || msg.contains("temporarily unavailable")
        || msg.contains("try again")
        || msg.contains("503")
        || msg.contains("502")
        || msg.contains("504")
}

// =============================================================================
// Git Clone
// =============================================================================

/// Clone a git repository with a timeout.
///
/// The firmware repository is large even shallow, hence the generous
/// default at the call site.
pub async fn git_clone(url: &str, dest: &Path, shallow: bool, timeout: Duration) -> Result<()> {
    use tokio::process::Command;

    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }

    // Handle broken/partial clones: a directory without .git gets removed,
    // a valid repository is an error the caller may resolve with a pull.
    if dest.exists() {
        let is_valid_git = dest.join(".git").exists() || dest.join("HEAD").exists();
        if !is_valid_git {
            tokio::fs::remove_dir_all(dest)
                .await
                .with_context(|| format!("Failed to remove invalid directory {}", dest.display()))?;
        } else {
            bail!(
                "Destination {} already exists and is a git repository. Remove it first or use git pull.",
                dest.display()
            );
        }
    }

    let mut cmd = Command::new("git");
    cmd.arg("clone");
    if shallow {
        cmd.args(["--depth", "1"]);
    }
    cmd.arg(url);
    cmd.arg(dest);

    let output = tokio::time::timeout(timeout, cmd.output())
        .await
        .with_context(|| format!("git clone timed out after {:?} for {}", timeout, url))?
        .with_context(|| format!("Failed to execute git clone for {}", url))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!(
            "git clone failed for {}\n  Exit code: {}\n  stderr: {}",
            url,
            output.status.code().unwrap_or(-1),
            stderr.trim()
        );
    }

    Ok(())
}

// =============================================================================
// Disk Space Checking
// =============================================================================

/// Check if there's enough disk space for a download.
///
/// Warns but continues if the check itself fails.
pub fn check_disk_space(path: &Path, required_bytes: u64) -> Result<()> {
    let required_gb = required_bytes as f64 / (1024.0 * 1024.0 * 1024.0);
    match get_available_space(path) {
        Some(avail) => {
            if avail < required_bytes {
                let available_gb = avail as f64 / (1024.0 * 1024.0 * 1024.0);
                bail!(
                    "Not enough disk space in {}\n  Required: {:.1} GB\n  Available: {:.1} GB",
                    path.display(),
                    required_gb,
                    available_gb
                );
            }
            Ok(())
        }
        None => {
            eprintln!(
                "WARNING: Could not check disk space for {}. Ensure at least {:.1} GB is available.",
                path.display(),
                required_gb
            );
            Ok(())
        }
    }
}

/// Get available disk space in bytes via `df -k`. Returns None on failure.
fn get_available_space(path: &Path) -> Option<u64> {
    use std::process::Command;

    let output = Command::new("df").arg("-k").arg(path).output().ok()?;
    if !output.status.success() {
        return None;
    }

    // Filesystem 1K-blocks Used Available Use% Mounted on
    let stdout = String::from_utf8_lossy(&output.stdout);
    let line = stdout.lines().nth(1)?;
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() >= 4 {
        if let Ok(kb) = fields[3].parse::<u64>() {
            return Some(kb * 1024);
        }
    }
    None
}

// =============================================================================
// Checksums
// =============================================================================

pub mod checksum {
    use anyhow::{bail, Context, Result};
    use sha2::{Digest, Sha256};
    use std::io::Read;
    use std::path::Path;

    /// Compute the SHA-256 of a file as lowercase hex.
    pub fn file_sha256(path: &Path) -> Result<String> {
        let file = std::fs::File::open(path)
            .with_context(|| format!("Failed to open {} for checksum", path.display()))?;
        let mut reader = std::io::BufReader::with_capacity(1024 * 1024, file);
        let mut hasher = Sha256::new();
        let mut buffer = [0u8; 1024 * 1024];

        loop {
            let bytes_read = reader
                .read(&mut buffer)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            if bytes_read == 0 {
                break;
            }
            hasher.update(&buffer[..bytes_read]);
        }

        Ok(format!("{:x}", hasher.finalize()))
    }

    /// Verify SHA-256 checksum of a file against an expected hex digest.
    pub fn verify_sha256(path: &Path, expected: &str) -> Result<()> {
        let actual = file_sha256(path)?;
        if actual != expected.to_lowercase() {
            bail!(
                "Checksum mismatch for {}\n  Expected: {}\n  Actual:   {}",
                path.display(),
                expected,
                actual
            );
        }
        Ok(())
    }
}
