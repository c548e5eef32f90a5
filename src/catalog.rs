// ─────────────────────────────────────────────────────────────────────────────
//  openshock-autoflasher :: catalog  —  firmware catalog client
//
//  Layout of the firmware server (all plain files under one base URL):
//
//    /version-<channel>.txt                  → "1.2.0\n"
//    /<version>/boards.txt                   → one board id per line
//    /<version>/<board>/firmware.bin         → raw image
//    /<version>/<board>/hashes.sha256.txt    → "<hex>  <file name>" lines
//
//  Version and board list are fetched at most once per run.  The image and
//  its manifest are fetched in parallel (rayon::join); the image only becomes
//  a FirmwareImage once its SHA-256 matches the manifest.
// ─────────────────────────────────────────────────────────────────────────────

use std::collections::HashMap;
use std::io::Read;

use sha2::{Digest, Sha256};

use crate::config::VersionSource;
use crate::constants::{FIRMWARE_FILE_NAMES, REQUEST_TIMEOUT};
use crate::error::{FlashError, Result};

// ─────────────────────────────────────────────────────────────────────────────
//  HTTP boundary
// ─────────────────────────────────────────────────────────────────────────────

/// Blocking GET. Anything but a 2xx answer is a `FlashError::Network`.
pub trait HttpClient: Send + Sync {
    fn get_bytes(&self, url: &str) -> Result<Vec<u8>>;

    fn get_text(&self, url: &str) -> Result<String> {
        let body = self.get_bytes(url)?;
        String::from_utf8(body).map_err(|e| FlashError::network(url, format!("response is not UTF-8: {}", e)))
    }
}

pub struct UreqClient {
    agent: ureq::Agent,
}

impl UreqClient {
    pub fn new() -> Self {
        Self { agent: ureq::AgentBuilder::new().timeout(REQUEST_TIMEOUT).build() }
    }
}

impl Default for UreqClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpClient for UreqClient {
    fn get_bytes(&self, url: &str) -> Result<Vec<u8>> {
        let resp = match self.agent.get(url).call() {
            Ok(r) => r,
            Err(ureq::Error::Status(code, r)) => {
                return Err(FlashError::network(url, format!("HTTP {} {}", code, r.status_text())));
            }
            Err(e) => return Err(FlashError::network(url, e.to_string())),
        };

        let mut buf = Vec::new();
        resp.into_reader()
            .read_to_end(&mut buf)
            .map_err(|e| FlashError::network(url, format!("failed to read response body: {}", e)))?;
        Ok(buf)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
//  Catalog
// ─────────────────────────────────────────────────────────────────────────────

/// Raw result of the parallel download, not yet trusted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareDownload {
    pub data:     Vec<u8>,
    pub manifest: String,
}

impl FirmwareDownload {
    /// Check `data` against the manifest's `firmware.bin` entry.
    pub fn verify(self) -> Result<FirmwareImage> {
        let expected = find_firmware_digest(&self.manifest)
            .ok_or_else(|| FlashError::Integrity("Could not find hash for firmware.bin".into()))?;
        let sha256 = verify_digest(&self.data, expected)?;
        Ok(FirmwareImage { data: self.data, sha256 })
    }
}

/// A downloaded image whose digest has already been checked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareImage {
    pub data:   Vec<u8>,
    /// Lowercase hex SHA-256 of `data`.
    pub sha256: String,
}

pub struct FirmwareCatalog {
    base_url:      String,
    http:          Box<dyn HttpClient>,
    version_cache: Option<String>,
    boards_cache:  HashMap<String, Vec<String>>,
}

impl FirmwareCatalog {
    pub fn new(base_url: &str, http: Box<dyn HttpClient>) -> Self {
        Self {
            base_url:      base_url.trim_end_matches('/').to_owned(),
            http,
            version_cache: None,
            boards_cache:  HashMap::new(),
        }
    }

    /// Explicit versions are returned as-is without touching the network.
    pub fn resolve_version(&mut self, source: &VersionSource) -> Result<String> {
        let channel = match source {
            VersionSource::Explicit(v) => return Ok(v.clone()),
            VersionSource::Channel(c)  => *c,
        };

        if let Some(v) = &self.version_cache {
            return Ok(v.clone());
        }

        let url     = format!("{}/version-{}.txt", self.base_url, channel);
        let version = self.http.get_text(&url)?.trim().to_owned();
        if version.is_empty() {
            return Err(FlashError::network(&url, "empty version string"));
        }

        self.version_cache = Some(version.clone());
        Ok(version)
    }

    pub fn list_boards(&mut self, version: &str) -> Result<Vec<String>> {
        if let Some(boards) = self.boards_cache.get(version) {
            return Ok(boards.clone());
        }

        let url  = format!("{}/{}/boards.txt", self.base_url, version);
        let text = self.http.get_text(&url)?;
        let boards: Vec<String> = text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_owned)
            .collect();

        self.boards_cache.insert(version.to_owned(), boards.clone());
        Ok(boards)
    }

    /// Download the image and its manifest concurrently.
    ///
    /// Either download failing fails the whole call; nothing partial is used.
    pub fn fetch_firmware(&self, version: &str, board: &str) -> Result<FirmwareDownload> {
        let firmware_url = format!("{}/{}/{}/firmware.bin", self.base_url, version, board);
        let hashes_url   = format!("{}/{}/{}/hashes.sha256.txt", self.base_url, version, board);

        let http = self.http.as_ref();
        let (firmware, manifest) = rayon::join(
            || http.get_bytes(&firmware_url),
            || http.get_text(&hashes_url),
        );

        Ok(FirmwareDownload { data: firmware?, manifest: manifest? })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
//  Manifest + digest
// ─────────────────────────────────────────────────────────────────────────────

/// Parse `sha256sum`-style lines into (digest, file name) pairs.
///
/// File names may contain spaces; the tokens after the digest are rejoined
/// with single spaces. Lines with fewer than two tokens are skipped.
pub fn parse_manifest(text: &str) -> Vec<(&str, String)> {
    text.lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let digest    = parts.next()?;
            let name: Vec<&str> = parts.collect();
            if name.is_empty() {
                return None;
            }
            Some((digest, name.join(" ")))
        })
        .collect()
}

/// Digest recorded for the firmware image, if the manifest lists it.
pub fn find_firmware_digest(manifest: &str) -> Option<&str> {
    parse_manifest(manifest)
        .into_iter()
        .find(|(_, name)| FIRMWARE_FILE_NAMES.contains(&name.as_str()))
        .map(|(digest, _)| digest)
}

/// Compare the SHA-256 of `data` against `expected`, ignoring letter case.
/// Returns the computed digest in lowercase hex.
pub fn verify_digest(data: &[u8], expected: &str) -> Result<String> {
    let actual = hex::encode(Sha256::digest(data));
    if !actual.eq_ignore_ascii_case(expected.trim()) {
        return Err(FlashError::Integrity(format!(
            "Hash mismatch! Expected {}, got {}",
            expected.trim(),
            actual
        )));
    }
    Ok(actual)
}

// ─────────────────────────────────────────────────────────────────────────────
//  Test support
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// In-memory server: URL → body. Unknown URLs answer 404.
    #[derive(Clone, Default)]
    pub struct FakeHttp {
        pub routes:   Arc<Mutex<HashMap<String, Vec<u8>>>>,
        pub requests: Arc<Mutex<Vec<String>>>,
    }

    impl FakeHttp {
        pub fn route(self, url: &str, body: impl Into<Vec<u8>>) -> Self {
            self.routes.lock().unwrap().insert(url.to_owned(), body.into());
            self
        }

        pub fn hits(&self, url: &str) -> usize {
            self.requests.lock().unwrap().iter().filter(|u| *u == url).count()
        }
    }

    impl HttpClient for FakeHttp {
        fn get_bytes(&self, url: &str) -> Result<Vec<u8>> {
            self.requests.lock().unwrap().push(url.to_owned());
            self.routes
                .lock()
                .unwrap()
                .get(url)
                .cloned()
                .ok_or_else(|| FlashError::network(url, "HTTP 404 Not Found"))
        }
    }

    pub fn sha256_hex(data: &[u8]) -> String {
        hex::encode(Sha256::digest(data))
    }
}

#[cfg(test)]
mod tests {
    use super::fake::{sha256_hex, FakeHttp};
    use super::*;
    use crate::config::Channel;
    use pretty_assertions::assert_eq;

    const BASE: &str = "http://fw.test";

    fn catalog(http: &FakeHttp) -> FirmwareCatalog {
        FirmwareCatalog::new(BASE, Box::new(http.clone()))
    }

    #[test]
    fn resolves_channel_version_once() {
        let http = FakeHttp::default().route("http://fw.test/version-stable.txt", "1.2.0\n");
        let mut cat = catalog(&http);

        let source = VersionSource::Channel(Channel::Stable);
        assert_eq!(cat.resolve_version(&source).unwrap(), "1.2.0");
        assert_eq!(cat.resolve_version(&source).unwrap(), "1.2.0");
        assert_eq!(http.hits("http://fw.test/version-stable.txt"), 1);
    }

    #[test]
    fn explicit_version_skips_network() {
        let http = FakeHttp::default();
        let mut cat = catalog(&http);

        let v = cat.resolve_version(&VersionSource::Explicit("1.3.0-rc.1".into())).unwrap();
        assert_eq!(v, "1.3.0-rc.1");
        assert!(http.requests.lock().unwrap().is_empty());
    }

    #[test]
    fn unreachable_version_is_network_error() {
        let http = FakeHttp::default();
        let mut cat = catalog(&http);
        let err = cat.resolve_version(&VersionSource::Channel(Channel::Beta)).unwrap_err();
        match err {
            FlashError::Network { url, reason } => {
                assert_eq!(url, "http://fw.test/version-beta.txt");
                assert!(reason.contains("404"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn lists_boards_once_per_version() {
        let http = FakeHttp::default()
            .route("http://fw.test/1.2.0/boards.txt", "pill\n  wemos-d1 \n\nseeed-xiao\n")
            .route("http://fw.test/1.3.0/boards.txt", "pill\n");
        let mut cat = catalog(&http);

        let boards = cat.list_boards("1.2.0").unwrap();
        assert_eq!(boards, vec!["pill", "wemos-d1", "seeed-xiao"]);
        cat.list_boards("1.2.0").unwrap();
        assert_eq!(http.hits("http://fw.test/1.2.0/boards.txt"), 1);

        assert_eq!(cat.list_boards("1.3.0").unwrap(), vec!["pill"]);
        assert_eq!(http.hits("http://fw.test/1.3.0/boards.txt"), 1);
    }

    #[test]
    fn trailing_slash_in_base_url_is_ignored() {
        let http = FakeHttp::default().route("http://fw.test/version-develop.txt", "2.0.0");
        let mut cat = FirmwareCatalog::new("http://fw.test/", Box::new(http.clone()));
        assert_eq!(cat.resolve_version(&VersionSource::Channel(Channel::Develop)).unwrap(), "2.0.0");
    }

    #[test]
    fn manifest_lines_are_split_and_rejoined() {
        let text = "abc  firmware.bin\n\ndef ./static fs.bin\nlonely\n";
        assert_eq!(
            parse_manifest(text),
            vec![("abc", "firmware.bin".to_string()), ("def", "./static fs.bin".to_string())]
        );
    }

    #[test]
    fn finds_digest_under_either_name() {
        assert_eq!(find_firmware_digest("111 bootloader.bin\n222 ./firmware.bin\n"), Some("222"));
        assert_eq!(find_firmware_digest("333  firmware.bin"), Some("333"));
        assert_eq!(find_firmware_digest("444 firmware.bin.gz\n"), None);
    }

    #[test]
    fn digest_comparison_ignores_case() {
        let data = b"fw";
        let upper = sha256_hex(data).to_uppercase();
        assert_eq!(verify_digest(data, &upper).unwrap(), sha256_hex(data));
    }

    #[test]
    fn single_bit_flip_is_rejected() {
        let data = b"OpenShock firmware image".to_vec();
        let digest = sha256_hex(&data);

        let mut mutated = data.clone();
        mutated[3] ^= 0x01;
        let err = verify_digest(&mutated, &digest).unwrap_err();
        assert!(matches!(err, FlashError::Integrity(ref m) if m.contains("Hash mismatch")));
        assert!(err.to_string().contains(&digest));
    }

    #[test]
    fn downloads_and_verifies_image() {
        let data = b"test firmware data".to_vec();
        let http = FakeHttp::default()
            .route("http://fw.test/1.0.0/pill/firmware.bin", data.clone())
            .route(
                "http://fw.test/1.0.0/pill/hashes.sha256.txt",
                format!("{}  firmware.bin\n", sha256_hex(&data)),
            );

        let image = catalog(&http).fetch_firmware("1.0.0", "pill").unwrap().verify().unwrap();
        assert_eq!(image.data, data);
        assert_eq!(image.sha256, sha256_hex(&data));
    }

    #[test]
    fn missing_manifest_entry_is_integrity_error() {
        let http = FakeHttp::default()
            .route("http://fw.test/1.0.0/pill/firmware.bin", b"fw".to_vec())
            .route("http://fw.test/1.0.0/pill/hashes.sha256.txt", "abc  other.bin\n");

        let err = catalog(&http).fetch_firmware("1.0.0", "pill").unwrap().verify().unwrap_err();
        assert_eq!(err.to_string(), "Could not find hash for firmware.bin");
    }

    #[test]
    fn failed_manifest_download_fails_whole_step() {
        let http = FakeHttp::default().route("http://fw.test/1.0.0/pill/firmware.bin", b"fw".to_vec());

        let err = catalog(&http).fetch_firmware("1.0.0", "pill").unwrap_err();
        assert!(matches!(err, FlashError::Network { .. }));
        assert_eq!(http.hits("http://fw.test/1.0.0/pill/firmware.bin"), 1);
    }
}
