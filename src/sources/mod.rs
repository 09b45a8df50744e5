//! Locator classification and cache naming.
//!
//! Anything a user types after a play command is one of: a network link to
//! stream, the name of an encoded file in the audio directory, a local raw
//! file to transcode, or a tag created earlier with `!tag`.

use std::{
    path::{Path, PathBuf},
    sync::LazyLock,
};

use regex::Regex;
use url::Url;

use crate::audio::sound::Sound;

/// Hosts recognised as streamable services even without a scheme.
const KNOWN_HOSTS: &[&str] = &["youtube.com", "youtu.be", "soundcloud.com"];

/// Cache file prefix for a streamed service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceType {
    YouTube,
    SoundCloud,
    Url,
}

impl SourceType {
    pub fn of(locator: &str) -> Self {
        if is_youtube_url(locator) {
            SourceType::YouTube
        } else if locator.contains("soundcloud.com") {
            SourceType::SoundCloud
        } else {
            SourceType::Url
        }
    }

    pub fn cache_prefix(&self) -> &'static str {
        match self {
            SourceType::YouTube => "yt_",
            SourceType::SoundCloud => "sc_",
            SourceType::Url => "url_",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocatorKind {
    /// Network locator, already canonicalised.
    Stream(String),
    /// Encoded `.dca` file in the audio directory.
    EncodedFile(String),
    /// Local file in another format.
    RawFile(String),
    /// Reference to `tag_<name>.dca`.
    Tag(String),
}

pub fn is_youtube_url(locator: &str) -> bool {
    locator.contains("youtube.com") || locator.contains("youtu.be")
}

pub fn is_stream_locator(input: &str) -> bool {
    let lower = input.to_ascii_lowercase();
    lower.starts_with("http://")
        || lower.starts_with("https://")
        || KNOWN_HOSTS.iter().any(|host| lower.starts_with(host) || lower.starts_with(&format!("www.{host}")))
}

static YOUTUBE_ID: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?:youtube\.com/(?:watch\?(?:.*&)?v=|embed/|shorts/)|youtu\.be/)([A-Za-z0-9_-]{11})").ok()
});

/// Extracts the 11-character video id from a YouTube link.
pub fn youtube_id(link: &str) -> Option<String> {
    YOUTUBE_ID
        .as_ref()?
        .captures(link)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Canonical form used both for streaming and for cache naming.
///
/// YouTube links collapse to `https://youtu.be/<id>`; anything else only
/// gains a scheme if it lacks one.
pub fn canonical_locator(input: &str) -> String {
    if let Some(id) = youtube_id(input) {
        return format!("https://youtu.be/{id}");
    }
    if input.contains("://") {
        input.to_string()
    } else {
        format!("https://{input}")
    }
}

/// Deterministic `.dca` file name a locator is prefetched to.
pub fn cache_file_name(locator: &str) -> String {
    let kind = SourceType::of(locator);
    let id = match kind {
        SourceType::YouTube => youtube_id(locator).unwrap_or_else(|| sanitize(locator)),
        SourceType::SoundCloud => Url::parse(&canonical_locator(locator))
            .map(|url| sanitize(url.path()))
            .unwrap_or_else(|_| sanitize(locator)),
        SourceType::Url => Url::parse(&canonical_locator(locator))
            .map(|url| {
                let host = url.host_str().unwrap_or_default().trim_start_matches("www.");
                sanitize(&format!("{host}{}", url.path()))
            })
            .unwrap_or_else(|_| sanitize(locator)),
    };
    format!("{}{}.dca", kind.cache_prefix(), id)
}

/// Link for one id printed by the fetch tool while listing a playlist.
///
/// YouTube and SoundCloud ids are expanded to a track link; for any other
/// service the entry is used only if it already is a link.
pub fn playlist_entry_link(playlist: &str, entry: &str) -> Option<String> {
    let entry = entry.trim();
    if entry.is_empty() {
        return None;
    }
    match SourceType::of(playlist) {
        SourceType::YouTube => Some(format!("https://youtu.be/{entry}")),
        SourceType::SoundCloud => Some(format!("https://api.soundcloud.com/tracks/{entry}")),
        SourceType::Url => is_stream_locator(entry).then(|| canonical_locator(entry)),
    }
}

pub fn tag_file_name(tag: &str) -> String {
    format!("tag_{tag}.dca")
}

/// Tag names end up in file names; only `[A-Za-z0-9_-]` is accepted.
pub fn is_valid_tag(tag: &str) -> bool {
    !tag.is_empty() && tag.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Collapses every run of characters outside `[A-Za-z0-9_-]` into one `-`.
fn sanitize(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
            out.push(c);
        } else if !out.ends_with('-') {
            out.push('-');
        }
    }
    out.trim_matches('-').to_string()
}

/// Local names must stay inside the audio directory.
pub fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty() && !name.starts_with('.') && !name.contains(['/', '\\']) && !name.contains("..")
}

/// Maps user input to playable sounds within one audio directory.
#[derive(Debug, Clone)]
pub struct LinkClassifier {
    audio_dir: PathBuf,
}

impl LinkClassifier {
    pub fn new(audio_dir: impl Into<PathBuf>) -> Self {
        Self {
            audio_dir: audio_dir.into(),
        }
    }

    pub fn audio_dir(&self) -> &Path {
        &self.audio_dir
    }

    /// Returns `None` for names that would escape the audio directory.
    pub fn classify(&self, input: &str) -> Option<LocatorKind> {
        let input = input.trim();
        if input.is_empty() {
            return None;
        }

        if is_stream_locator(input) {
            return Some(LocatorKind::Stream(canonical_locator(input)));
        }

        if !is_plain_file_name(input) {
            return None;
        }

        match Path::new(input).extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("dca") => Some(LocatorKind::EncodedFile(input.to_string())),
            Some(_) => Some(LocatorKind::RawFile(input.to_string())),
            None if is_valid_tag(input) => Some(LocatorKind::Tag(input.to_string())),
            None => None,
        }
    }

    /// Where a prefetch of `locator` is written.
    pub fn cache_path(&self, locator: &str) -> PathBuf {
        self.audio_dir.join(cache_file_name(locator))
    }

    pub fn tag_path(&self, tag: &str) -> PathBuf {
        self.audio_dir.join(tag_file_name(tag))
    }

    /// Builds the sound for a piece of user input.
    ///
    /// A link whose cache file already exists plays from disk instead of
    /// being streamed again.
    pub fn sound_for(&self, input: &str) -> Option<Sound> {
        let sound = match self.classify(input)? {
            LocatorKind::Stream(locator) => {
                let cached = self.cache_path(&locator);
                if cached.is_file() {
                    Sound::on_disk(cache_file_name(&locator), cached)
                } else {
                    Sound::streamed(locator)
                }
            }
            LocatorKind::EncodedFile(name) => {
                let path = self.audio_dir.join(&name);
                Sound::on_disk(name, path)
            }
            LocatorKind::RawFile(name) => {
                let path = self.audio_dir.join(&name);
                Sound::raw_file(name, path)
            }
            LocatorKind::Tag(tag) => {
                let name = tag_file_name(&tag);
                let path = self.audio_dir.join(&name);
                Sound::on_disk(name, path)
            }
        };
        Some(sound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::sound::SoundKind;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_youtube_links_share_one_id() {
        for link in [
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
            "https://youtube.com/watch?feature=share&v=dQw4w9WgXcQ&t=10",
            "youtu.be/dQw4w9WgXcQ",
            "https://youtu.be/dQw4w9WgXcQ?si=abc",
        ] {
            assert_eq!(youtube_id(link).as_deref(), Some("dQw4w9WgXcQ"), "{link}");
            assert_eq!(canonical_locator(link), "https://youtu.be/dQw4w9WgXcQ");
            assert_eq!(cache_file_name(link), "yt_dQw4w9WgXcQ.dca");
        }
    }

    #[test]
    fn test_cache_names_for_other_services() {
        assert_eq!(cache_file_name("https://soundcloud.com/artist/track"), "sc_artist-track.dca");
        assert_eq!(
            cache_file_name("https://www.example.com/media/horn.mp3"),
            "url_example-com-media-horn-mp3.dca"
        );
    }

    #[test]
    fn test_playlist_entries_become_links() {
        let playlist = "https://www.youtube.com/playlist?list=PL123";
        assert_eq!(
            playlist_entry_link(playlist, "dQw4w9WgXcQ\n").as_deref(),
            Some("https://youtu.be/dQw4w9WgXcQ")
        );
        assert_eq!(
            playlist_entry_link("https://soundcloud.com/a/sets/b", "12345").as_deref(),
            Some("https://api.soundcloud.com/tracks/12345")
        );
        assert_eq!(playlist_entry_link("https://example.com/list", "abc"), None);
        assert_eq!(playlist_entry_link(playlist, "  "), None);
    }

    #[test]
    fn test_classify() {
        let links = LinkClassifier::new("audio");
        assert_eq!(
            links.classify("soundcloud.com/a/b"),
            Some(LocatorKind::Stream("https://soundcloud.com/a/b".into()))
        );
        assert_eq!(
            links.classify("airhorn_default.dca"),
            Some(LocatorKind::EncodedFile("airhorn_default.dca".into()))
        );
        assert_eq!(links.classify("intro.mp3"), Some(LocatorKind::RawFile("intro.mp3".into())));
        assert_eq!(links.classify("bruh"), Some(LocatorKind::Tag("bruh".into())));
        assert_eq!(links.classify("../secret.dca"), None);
        assert_eq!(links.classify("   "), None);
    }

    #[test]
    fn test_sound_for_prefers_cached_file() {
        let dir = tempfile::tempdir().unwrap();
        let links = LinkClassifier::new(dir.path());
        let link = "https://www.youtube.com/watch?v=dQw4w9WgXcQ";

        let sound = links.sound_for(link).unwrap();
        assert!(matches!(sound.kind(), SoundKind::Streamed(l) if l == "https://youtu.be/dQw4w9WgXcQ"));

        std::fs::write(dir.path().join("yt_dQw4w9WgXcQ.dca"), b"").unwrap();
        let sound = links.sound_for(link).unwrap();
        assert!(matches!(sound.kind(), SoundKind::OnDisk(_)));
        assert_eq!(sound.display_label(), "youtu.be/dQw4w9WgXcQ");
    }

    #[test]
    fn test_tags_resolve_to_tag_files() {
        let links = LinkClassifier::new("audio");
        let sound = links.sound_for("bruh").unwrap();
        assert_eq!(sound.name(), "tag_bruh.dca");
        assert!(matches!(sound.kind(), SoundKind::OnDisk(p) if p == Path::new("audio/tag_bruh.dca")));
        assert!(!is_valid_tag("a b"));
    }
}
