use futures_util::future::try_join_all;
use reqwest::Client;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::Stdio;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::EngineConfiguration;
use crate::error::SynthesisError;
use crate::voice::artifact::{self, TempPaths};
use crate::voice::find_on_path;

/// Longest piece of text the remote service accepts per request.
const MAX_CHUNK_CHARS: usize = 100;

pub const REFERENCE_VOICE: &str = "audio/audio.wav";
pub const VOICE_CLONE_LANGUAGE: &str = "ko";
const COQUI_TOS_ENV: &str = "COQUI_TOS_AGREED";
pub const VOICE_CLONE_MODEL: &str = "tts_models/multilingual/multi-dataset/xtts_v2";

/// One speak request's text after cleanup, plus how to voice it.
#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    pub raw: String,
    pub cleaned: String,
    pub language: String,
    pub slow: bool,
}

impl Utterance {
    /// Returns `None` when nothing is left to say after cleanup.
    pub fn prepare(raw: &str, config: &EngineConfiguration) -> Option<Self> {
        let cleaned = config.cleanup.apply(raw).trim().to_string();
        if cleaned.is_empty() {
            return None;
        }
        Some(Self {
            raw: raw.to_string(),
            cleaned,
            language: config.language.clone(),
            slow: config.slow,
        })
    }
}

pub type SynthesisResult = Result<(), SynthesisError>;

/// A way of turning an utterance into an audio file at `out`.
pub trait Synthesizer: Send + Sync {
    fn name(&self) -> &str;
    fn synthesize_to<'a>(
        &'a self,
        utterance: &'a Utterance,
        out: &'a Path,
    ) -> Pin<Box<dyn Future<Output = SynthesisResult> + Send + 'a>>;
}

/// Picks the remote or voice-clone strategy per request and owns the fixed
/// artifact path.
#[derive(Clone)]
pub struct SynthesisProvider {
    remote: Arc<dyn Synthesizer>,
    voice_clone: Arc<dyn Synthesizer>,
    paths: TempPaths,
}

impl SynthesisProvider {
    pub fn new(
        remote: Arc<dyn Synthesizer>,
        voice_clone: Arc<dyn Synthesizer>,
        paths: TempPaths,
    ) -> Self {
        Self {
            remote,
            voice_clone,
            paths,
        }
    }

    pub fn with_defaults(paths: TempPaths) -> Self {
        Self::new(
            Arc::new(GoogleTts::new()),
            Arc::new(VoiceClone::default()),
            paths,
        )
    }

    pub fn paths(&self) -> &TempPaths {
        &self.paths
    }

    /// Cleans `text` and synthesizes it over the artifact path.
    ///
    /// `Ok(None)` means the text was empty after cleanup and no strategy ran.
    /// Any previous artifact is overwritten.
    pub async fn synthesize(
        &self,
        text: &str,
        config: &EngineConfiguration,
    ) -> Result<Option<PathBuf>, SynthesisError> {
        let Some(utterance) = Utterance::prepare(text, config) else {
            info!("Nothing to speak after cleanup");
            return Ok(None);
        };
        let strategy = if config.voice_clone {
            &self.voice_clone
        } else {
            &self.remote
        };
        info!(strategy = strategy.name(), text = %utterance.cleaned, "Synthesizing");
        strategy.synthesize_to(&utterance, &self.paths.artifact).await?;
        Ok(Some(self.paths.artifact.clone()))
    }
}

/// Google Translate's text-to-speech endpoint. Returns MP3.
pub struct GoogleTts {
    client: Client,
    endpoint: Option<String>,
}

impl Default for GoogleTts {
    fn default() -> Self {
        Self::new()
    }
}

impl GoogleTts {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
            endpoint: None,
        }
    }

    /// Sends every request to `endpoint` instead of the regional Google host.
    pub fn with_endpoint(endpoint: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            endpoint: Some(endpoint.into()),
        }
    }

    fn url_for(&self, language: &str) -> (String, String) {
        let (lang, tld) = regional_voice(language);
        let url = self
            .endpoint
            .clone()
            .unwrap_or_else(|| format!("https://translate.google.{}/translate_tts", tld));
        (url, lang)
    }

    async fn fetch_chunk(
        &self,
        url: &str,
        lang: &str,
        slow: bool,
        chunk: &str,
        idx: usize,
        total: usize,
    ) -> Result<Vec<u8>, SynthesisError> {
        let total_s = total.to_string();
        let idx_s = idx.to_string();
        let len_s = chunk.chars().count().to_string();
        let res = self
            .client
            .get(url)
            .query(&[
                ("ie", "UTF-8"),
                ("client", "tw-ob"),
                ("tl", lang),
                ("q", chunk),
                ("total", total_s.as_str()),
                ("idx", idx_s.as_str()),
                ("textlen", len_s.as_str()),
                ("ttsspeed", if slow { "0.3" } else { "1" }),
            ])
            .send()
            .await?;
        if !res.status().is_success() {
            return Err(SynthesisError::Status {
                status: res.status(),
                chunk: idx,
            });
        }
        Ok(res.bytes().await?.to_vec())
    }
}

impl Synthesizer for GoogleTts {
    fn name(&self) -> &str {
        "google"
    }

    fn synthesize_to<'a>(
        &'a self,
        utterance: &'a Utterance,
        out: &'a Path,
    ) -> Pin<Box<dyn Future<Output = SynthesisResult> + Send + 'a>> {
        Box::pin(async move {
            let (url, lang) = self.url_for(&utterance.language);
            let chunks = split_text(&utterance.cleaned, MAX_CHUNK_CHARS);
            debug!(chunks = chunks.len(), lang = %lang, "Requesting speech");

            let total = chunks.len();
            let parts = try_join_all(chunks.iter().enumerate().map(|(idx, chunk)| {
                self.fetch_chunk(&url, &lang, utterance.slow, chunk, idx, total)
            }))
            .await?;

            // MP3 frames are self-delimiting, so chunks concatenate cleanly.
            let audio: Vec<u8> = parts.concat();
            artifact::write_atomic(out, &audio)?;
            Ok(())
        })
    }
}

/// Maps language codes with a region to (language, Google top-level domain).
fn regional_voice(code: &str) -> (String, String) {
    match code.to_ascii_lowercase().as_str() {
        "en-us" => ("en".into(), "com".into()),
        "en-gb" | "en-uk" => ("en".into(), "co.uk".into()),
        "en-au" => ("en".into(), "com.au".into()),
        "en-in" => ("en".into(), "co.in".into()),
        "fr-ca" => ("fr".into(), "ca".into()),
        "pt-br" => ("pt".into(), "com.br".into()),
        "es-es" => ("es".into(), "es".into()),
        "es-mx" => ("es".into(), "com.mx".into()),
        _ => (code.to_string(), "com".into()),
    }
}

/// Packs words into pieces of at most `max` characters. Words longer than
/// `max` are hard-split.
pub fn split_text(text: &str, max: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for word in text.split_whitespace() {
        let word_len = word.chars().count();
        if word_len > max {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
                current_len = 0;
            }
            let chars: Vec<char> = word.chars().collect();
            for piece in chars.chunks(max) {
                chunks.push(piece.iter().collect());
            }
            continue;
        }
        let needed = if current.is_empty() {
            word_len
        } else {
            current_len + 1 + word_len
        };
        if needed > max {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if !current.is_empty() {
            current.push(' ');
            current_len += 1;
        }
        current.push_str(word);
        current_len += word_len;
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Local XTTS v2 voice cloning through the Coqui `tts` command.
pub struct VoiceClone {
    bin: PathBuf,
    model: String,
    reference: PathBuf,
    language: String,
    use_cuda: bool,
}

impl Default for VoiceClone {
    fn default() -> Self {
        let use_cuda = find_on_path("nvidia-smi").is_some();
        Self {
            bin: find_on_path("tts").unwrap_or_else(|| PathBuf::from("tts")),
            model: VOICE_CLONE_MODEL.to_string(),
            reference: PathBuf::from(REFERENCE_VOICE),
            language: VOICE_CLONE_LANGUAGE.to_string(),
            use_cuda,
        }
    }
}

impl VoiceClone {
    pub fn new(bin: impl Into<PathBuf>, reference: impl Into<PathBuf>) -> Self {
        Self {
            bin: bin.into(),
            reference: reference.into(),
            ..Self::default()
        }
    }

    fn command(&self, text: &str, out: &Path) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(&self.bin);
        cmd.arg("--model_name")
            .arg(&self.model)
            .arg("--text")
            .arg(text)
            .arg("--speaker_wav")
            .arg(&self.reference)
            .arg("--language_idx")
            .arg(&self.language)
            .arg("--out_path")
            .arg(out)
            .arg("--use_cuda")
            .arg(if self.use_cuda { "true" } else { "false" })
            // The model download otherwise prompts for the license on stdin.
            .env(COQUI_TOS_ENV, "1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd
    }

    pub fn device_label(&self) -> &'static str {
        if self.use_cuda {
            "cuda"
        } else {
            "cpu"
        }
    }
}

impl Synthesizer for VoiceClone {
    fn name(&self) -> &str {
        "voice-clone"
    }

    fn synthesize_to<'a>(
        &'a self,
        utterance: &'a Utterance,
        out: &'a Path,
    ) -> Pin<Box<dyn Future<Output = SynthesisResult> + Send + 'a>> {
        Box::pin(async move {
            if !self.reference.exists() {
                return Err(SynthesisError::MissingReference(self.reference.clone()));
            }
            // Coqui picks the container from the extension.
            let staged = artifact::staging_path(out).with_extension("wav");

            let mut cmd = self.command(&utterance.cleaned, &staged);
            debug!(command = ?cmd, device = self.device_label(), "Running voice clone");
            let output = cmd
                .output()
                .await
                .map_err(|e| SynthesisError::Model(format!("{}: {}", self.bin.display(), e)))?;

            if !output.status.success() {
                artifact::remove_quietly(&staged);
                let stderr = String::from_utf8_lossy(&output.stderr);
                if stderr.contains("terms of service") || stderr.contains("EOFError") {
                    warn!("Voice clone needs the Coqui model license accepted; run `tts` once interactively");
                }
                return Err(SynthesisError::Model(format!(
                    "exit {}: {}",
                    output.status,
                    stderr.trim()
                )));
            }
            if !staged.exists() {
                warn!("Voice clone reported success without writing audio");
                return Err(SynthesisError::Model("no audio produced".into()));
            }
            artifact::commit(&staged, out)?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voice::cleanup::CleanupRuleSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting(AtomicUsize);

    impl Synthesizer for Counting {
        fn name(&self) -> &str {
            "counting"
        }

        fn synthesize_to<'a>(
            &'a self,
            _utterance: &'a Utterance,
            out: &'a Path,
        ) -> Pin<Box<dyn Future<Output = SynthesisResult> + Send + 'a>> {
            Box::pin(async move {
                self.0.fetch_add(1, Ordering::SeqCst);
                artifact::write_atomic(out, b"audio")?;
                Ok(())
            })
        }
    }

    fn provider(dir: &Path) -> (SynthesisProvider, Arc<Counting>, Arc<Counting>) {
        let remote = Arc::new(Counting(AtomicUsize::new(0)));
        let clone = Arc::new(Counting(AtomicUsize::new(0)));
        let provider = SynthesisProvider::new(remote.clone(), clone.clone(), TempPaths::in_dir(dir));
        (provider, remote, clone)
    }

    #[tokio::test]
    async fn empty_after_cleanup_short_circuits() {
        let dir = tempfile::tempdir().unwrap();
        let (provider, remote, clone) = provider(dir.path());
        let config = EngineConfiguration {
            cleanup: CleanupRuleSet::new(vec![("@".into(), "".into())]),
            ..EngineConfiguration::default()
        };

        assert_eq!(provider.synthesize("@@ @", &config).await.unwrap(), None);
        assert_eq!(remote.0.load(Ordering::SeqCst), 0);
        assert_eq!(clone.0.load(Ordering::SeqCst), 0);
        assert!(!provider.paths().artifact.exists());
    }

    #[tokio::test]
    async fn flag_selects_strategy() {
        let dir = tempfile::tempdir().unwrap();
        let (provider, remote, clone) = provider(dir.path());
        let mut config = EngineConfiguration::default();

        let path = provider.synthesize("hello", &config).await.unwrap();
        assert_eq!(path.as_deref(), Some(provider.paths().artifact.as_path()));
        assert_eq!(remote.0.load(Ordering::SeqCst), 1);

        config.voice_clone = true;
        provider.synthesize("hello", &config).await.unwrap();
        assert_eq!(clone.0.load(Ordering::SeqCst), 1);
        assert_eq!(remote.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn missing_reference_sample_fails() {
        let dir = tempfile::tempdir().unwrap();
        let clone = VoiceClone::new("tts", dir.path().join("nope.wav"));
        let utterance = Utterance {
            raw: "hi".into(),
            cleaned: "hi".into(),
            language: "ko".into(),
            slow: false,
        };
        let err = clone
            .synthesize_to(&utterance, &dir.path().join("out"))
            .await
            .unwrap_err();
        assert!(matches!(err, SynthesisError::MissingReference(_)));
    }

    #[tokio::test]
    async fn unreachable_service_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let tts = GoogleTts::with_endpoint("http://127.0.0.1:1/translate_tts");
        let utterance = Utterance {
            raw: "hi".into(),
            cleaned: "hi".into(),
            language: "ko".into(),
            slow: false,
        };
        let out = dir.path().join("out");
        assert!(tts.synthesize_to(&utterance, &out).await.is_err());
        assert!(!out.exists());
    }

    #[test]
    fn split_respects_limit() {
        let text = "word ".repeat(60);
        let chunks = split_text(&text, 100);
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.chars().count() <= 100));
        assert_eq!(chunks.join(" "), text.trim());
    }

    #[test]
    fn split_breaks_long_words() {
        let long: String = "가".repeat(250);
        let chunks = split_text(&long, 100);
        assert_eq!(
            chunks.iter().map(|c| c.chars().count()).collect::<Vec<_>>(),
            vec![100, 100, 50]
        );
    }

    #[test]
    fn voice_clone_command_accepts_license_without_prompt() {
        let clone = VoiceClone::new("tts", "audio/audio.wav");
        let cmd = clone.command("안녕", Path::new("/tmp/out.wav"));
        let std_cmd = cmd.as_std();

        let tos = std_cmd
            .get_envs()
            .find(|(k, _)| *k == COQUI_TOS_ENV)
            .and_then(|(_, v)| v);
        assert_eq!(tos, Some(std::ffi::OsStr::new("1")));

        let args: Vec<_> = std_cmd.get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        assert!(args.windows(2).any(|w| w[0] == "--language_idx" && w[1] == VOICE_CLONE_LANGUAGE));
        assert!(args.windows(2).any(|w| w[0] == "--out_path" && w[1] == "/tmp/out.wav"));
    }

    #[test]
    fn regional_codes_map_to_domains() {
        assert_eq!(regional_voice("en-gb"), ("en".into(), "co.uk".into()));
        assert_eq!(regional_voice("zh-CN"), ("zh-CN".into(), "com".into()));
        assert_eq!(regional_voice("ko"), ("ko".into(), "com".into()));
    }
}
