// SPDX-License-Identifier: GPL-3.0-or-later
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Structured metadata extracted from a free-form release title. Parsing is
/// total: any input yields a (possibly mostly-empty) result.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ParsedRelease {
    pub title: String,
    pub year: i64,
    pub season: i64,
    pub episode: i64,
    pub resolution: String,
    pub source: String,
    pub codec: String,
    pub proper: bool,
    pub repack: bool,
}

impl ParsedRelease {
    /// A season without an episode number is a pack.
    pub fn is_season_pack(&self) -> bool {
        self.season > 0 && self.episode == 0
    }
}

lazy_static! {
    static ref YEAR_REGEX: Regex = Regex::new(r"\b(19|20)\d{2}\b").expect("valid year regex");
    static ref SEASON_EPISODE_REGEX: Regex =
        Regex::new(r"(?i)S(\d{1,2})E(\d{1,2})").expect("valid season/episode regex");
    static ref SEASON_ONLY_REGEX: Regex =
        Regex::new(r"(?i)(?:^|[\._\s-])S(\d{1,2})(?:[\._\s-]|$)").expect("valid season regex");
    static ref SEASON_WORD_REGEX: Regex =
        Regex::new(r"(?i)Season[\s\._]?(\d{1,2})").expect("valid season word regex");
    static ref RESOLUTION_REGEX: Regex =
        Regex::new(r"(?i)(2160p|1080p|720p|480p|4k|uhd)").expect("valid resolution regex");
    static ref CODEC_REGEX: Regex =
        Regex::new(r"(?i)(x265|H\.?265|HEVC|x264|H\.?264|AVC|XviD)").expect("valid codec regex");
}

/// Parse a release title into structured fields.
pub fn parse_release_title(title: &str) -> ParsedRelease {
    let mut parsed = ParsedRelease::default();
    let mut clean_title = title.to_string();

    if let Some(m) = YEAR_REGEX.find(title) {
        parsed.year = m.as_str().parse().unwrap_or(0);
        clean_title = clean_title.replacen(m.as_str(), "", 1);
    }

    if let Some(caps) = SEASON_EPISODE_REGEX.captures(title) {
        parsed.season = caps[1].parse().unwrap_or(0);
        parsed.episode = caps[2].parse().unwrap_or(0);
    } else if let Some(caps) = SEASON_ONLY_REGEX.captures(title) {
        parsed.season = caps[1].parse().unwrap_or(0);
    } else if let Some(caps) = SEASON_WORD_REGEX.captures(title) {
        parsed.season = caps[1].parse().unwrap_or(0);
    }

    if let Some(m) = RESOLUTION_REGEX.find(title) {
        parsed.resolution = normalize_resolution(m.as_str());
    }

    // The full title goes to source detection: REMUX often appears alongside
    // BluRay ("BluRay.Remux") and must win.
    parsed.source = detect_source(title);

    if let Some(m) = CODEC_REGEX.find(title) {
        parsed.codec = normalize_codec(m.as_str());
    }

    let upper = title.to_uppercase();
    parsed.proper = upper.contains("PROPER");
    parsed.repack = upper.contains("REPACK");

    parsed.title = extract_title(&clean_title);

    parsed
}

fn normalize_resolution(res: &str) -> String {
    let res = res.trim().to_uppercase();
    if res.contains("2160") || res.contains("4K") || res.contains("UHD") {
        "2160P".to_string()
    } else if res.contains("1080") {
        "1080P".to_string()
    } else if res.contains("720") {
        "720P".to_string()
    } else if res.contains("480") {
        "480P".to_string()
    } else {
        res
    }
}

fn detect_source(title: &str) -> String {
    let upper = title.to_uppercase();
    if upper.contains("REMUX") {
        "REMUX".to_string()
    } else if upper.contains("BLURAY") || upper.contains("BLU-RAY") || upper.contains("BRRIP") {
        "BLURAY".to_string()
    } else if upper.contains("WEB-DL") || upper.contains("WEBDL") || upper.contains("WEBRIP") || upper.contains("WEB") {
        "WEB-DL".to_string()
    } else if upper.contains("HDTV") {
        "HDTV".to_string()
    } else if upper.contains("DVDRIP") || upper.contains("DVD") {
        "DVD".to_string()
    } else {
        String::new()
    }
}

fn normalize_codec(codec: &str) -> String {
    let codec = codec.trim().to_uppercase().replace('.', "");
    if codec.contains("X265") || codec.contains("HEVC") || codec.contains("H265") {
        "X265".to_string()
    } else if codec.contains("X264") || codec.contains("H264") || codec.contains("AVC") {
        "X264".to_string()
    } else if codec.contains("XVID") {
        "XVID".to_string()
    } else {
        codec
    }
}

/// Everything before the first quality indicator, separators collapsed to
/// spaces, accents stripped.
fn extract_title(clean_title: &str) -> String {
    let mut words: Vec<&str> = Vec::new();

    for part in clean_title.split(['.', ' ', '-', '_']) {
        if part.is_empty() {
            continue;
        }
        let upper = part.to_uppercase();
        if is_quality_boundary(&upper) {
            break;
        }
        if part.parse::<i64>().is_ok() {
            continue;
        }
        words.push(part);
    }

    strip_accents(&words.join(" "))
}

fn is_quality_boundary(upper_part: &str) -> bool {
    const MARKERS: [&str; 10] = [
        "2160", "1080", "720", "480", "BLURAY", "WEB", "REMUX", "HDTV", "X264", "X265",
    ];
    if MARKERS.iter().any(|m| upper_part.contains(m)) {
        return true;
    }
    SEASON_EPISODE_REGEX.is_match(upper_part)
        || SEASON_ONLY_REGEX.is_match(upper_part)
        || upper_part == "SEASON"
}

/// NFD-decompose and drop combining marks: "Néro" -> "Nero".
pub fn strip_accents(input: &str) -> String {
    input.nfd().filter(|c| !is_combining_mark(*c)).collect()
}

// ============================================================================
// Dedup normalization
// ============================================================================

lazy_static! {
    static ref DEDUP_QUALITY_REGEX: Regex =
        Regex::new(r"(?i)\b(2160P|1080P|720P|480P|4K|UHD|HD|SD)\b").expect("valid dedup quality regex");
    static ref DEDUP_CODEC_REGEX: Regex =
        Regex::new(r"(?i)\b(H\.?265|H\.?264|X265|X264|HEVC|AVC|VC-?1|XVID)\b").expect("valid dedup codec regex");
    static ref DEDUP_SOURCE_REGEX: Regex =
        Regex::new(r"(?i)\b(WEB-?DL|WEBRIP|WEB|BLU-?RAY|BRRIP|REMUX|HDTV|DVDRIP|DVD)\b").expect("valid dedup source regex");
    static ref DEDUP_AUDIO_REGEX: Regex =
        Regex::new(r"(?i)\b(DDP?A?[0-9.]+|ATMOS|TRUEHD|DTS(-?HD)?(-?MA)?|AAC|FLAC|LPCM|AC3)\b").expect("valid dedup audio regex");
    static ref DEDUP_HDR_REGEX: Regex =
        Regex::new(r"(?i)\b(HDR10\+?|HDR|DV|DOVI|SDR|10BIT)\b").expect("valid dedup hdr regex");
    static ref DEDUP_FLAG_REGEX: Regex =
        Regex::new(r"(?i)\b(HYBRID|REPACK|PROPER|RERIP)\b").expect("valid dedup flag regex");
    static ref DEDUP_SEPARATOR_REGEX: Regex =
        Regex::new(r"[.\s]+").expect("valid dedup separator regex");
}

/// Canonical form of a release title for queue/history comparison. Two
/// titles name the same release iff their normalizations are identical.
pub fn normalize_release_title(title: &str) -> String {
    let title = title.strip_suffix(".nzb").unwrap_or(title);
    let mut normalized = title.to_uppercase();

    for re in [
        &*DEDUP_QUALITY_REGEX,
        &*DEDUP_CODEC_REGEX,
        &*DEDUP_SOURCE_REGEX,
        &*DEDUP_AUDIO_REGEX,
        &*DEDUP_HDR_REGEX,
        &*DEDUP_FLAG_REGEX,
    ] {
        normalized = re.replace_all(&normalized, "").into_owned();
    }

    // Group tag: everything after the last dash.
    if let Some(idx) = normalized.rfind('-') {
        if idx > 0 {
            normalized.truncate(idx);
        }
    }

    DEDUP_SEPARATOR_REGEX
        .replace_all(&normalized, ".")
        .trim_matches('.')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_movie_release() {
        let parsed = parse_release_title("Arrival.2016.1080p.BluRay.x264-GROUP");
        assert_eq!(parsed.title, "Arrival");
        assert_eq!(parsed.year, 2016);
        assert_eq!(parsed.season, 0);
        assert_eq!(parsed.episode, 0);
        assert_eq!(parsed.resolution, "1080P");
        assert_eq!(parsed.source, "BLURAY");
        assert_eq!(parsed.codec, "X264");
        assert!(!parsed.proper);
        assert!(!parsed.is_season_pack());
    }

    #[test]
    fn parses_episode_release() {
        let parsed = parse_release_title("Bosch.Legacy.S03E01.720p.WEB-DL.H264-G");
        assert_eq!(parsed.title, "Bosch Legacy");
        assert_eq!(parsed.season, 3);
        assert_eq!(parsed.episode, 1);
        assert_eq!(parsed.resolution, "720P");
        assert_eq!(parsed.source, "WEB-DL");
        assert_eq!(parsed.codec, "X264");
    }

    #[test]
    fn parses_season_pack_release() {
        let parsed = parse_release_title("Show.S02.1080p.WEB-DL.x264-G");
        assert_eq!(parsed.season, 2);
        assert_eq!(parsed.episode, 0);
        assert!(parsed.is_season_pack());

        let worded = parse_release_title("Show Season 2 2160p WEBRip x265");
        assert_eq!(worded.season, 2);
        assert!(worded.is_season_pack());
    }

    #[test]
    fn remux_wins_over_bluray() {
        let parsed = parse_release_title("Movie.2020.2160p.BluRay.REMUX.HEVC-GRP");
        assert_eq!(parsed.source, "REMUX");
        assert_eq!(parsed.resolution, "2160P");
        assert_eq!(parsed.codec, "X265");
    }

    #[test]
    fn four_k_and_uhd_map_to_2160p() {
        assert_eq!(parse_release_title("Movie.2020.4K.WEB-DL").resolution, "2160P");
        assert_eq!(parse_release_title("Movie.2020.UHD.BluRay").resolution, "2160P");
    }

    #[test]
    fn proper_and_repack_flags() {
        let parsed = parse_release_title("Show.S01E02.PROPER.1080p.HDTV.x264");
        assert!(parsed.proper);
        assert!(!parsed.repack);

        let repack = parse_release_title("Show.S01E02.REPACK.1080p.HDTV.x264");
        assert!(repack.repack);
    }

    #[test]
    fn strips_accents_from_title() {
        let parsed = parse_release_title("Néro.2024.1080p.WEB-DL.x264-G");
        assert_eq!(parsed.title, "Nero");
        assert_eq!(strip_accents("Pokémon café"), "Pokemon cafe");
    }

    #[test]
    fn parse_is_total_and_season_stays_bounded() {
        for junk in ["", "....", "---", "S99E99", "!!!@#$%", "1080p"] {
            let parsed = parse_release_title(junk);
            assert!((0..=99).contains(&parsed.season));
        }
    }

    #[test]
    fn year_zero_when_absent() {
        let parsed = parse_release_title("Some.Show.S01E01.1080p.WEB-DL");
        assert_eq!(parsed.year, 0);
    }

    #[test]
    fn dedup_normalization_equates_same_release() {
        let a = normalize_release_title("Show.S02E03.1080p.WEB-DL.DDP5.1.H.264-GROUP");
        let b = normalize_release_title("Show.S02E03.1080p.WEB-DL.DDP5.1.H.264-OTHERGRP.nzb");
        assert_eq!(a, b);
        assert_eq!(a, "SHOW.S02E03");
    }

    #[test]
    fn dedup_normalization_strips_hdr_and_flags() {
        let n = normalize_release_title("Movie.2020.2160p.HDR10.HYBRID.REPACK.TrueHD.Atmos.REMUX-GRP");
        assert_eq!(n, "MOVIE.2020");
    }

    #[test]
    fn dedup_normalization_differs_for_different_episodes() {
        let a = normalize_release_title("Show.S02E03.1080p.WEB-DL-G");
        let b = normalize_release_title("Show.S02E04.1080p.WEB-DL-G");
        assert_ne!(a, b);
    }
}
