// SPDX-License-Identifier: GPL-3.0-or-later
use fetcharr_domain::Media;

use crate::release_parsing::{strip_accents, ParsedRelease};

/// Score floors below which a candidate is filtered out.
#[derive(Debug, Clone, Copy)]
pub struct ScoreFloors {
    pub min_validation: i64,
    pub min_quality: i64,
    pub min_total: i64,
}

impl Default for ScoreFloors {
    fn default() -> Self {
        Self { min_validation: 65, min_quality: 40, min_total: 105 }
    }
}

impl ScoreFloors {
    pub fn passes(&self, validation: i64, quality: i64) -> bool {
        validation >= self.min_validation
            && quality >= self.min_quality
            && validation + quality >= self.min_total
    }
}

/// Identity agreement between a release and the catalog row, 0..=100.
/// Title similarity contributes up to 50, year up to 30, season/episode up
/// to 20.
pub fn validation_score(media: &Media, parsed: &ParsedRelease) -> i64 {
    let mut score = title_similarity(&media.title, &parsed.title) * 50.0;

    score += year_score(media.year, parsed.year) as f64;

    if media.is_episode() {
        if parsed.season == media.season {
            score += 10.0;
            // A pack covering the right season gets the full 20.
            if parsed.episode == 0 {
                score += 10.0;
            }
        }
        if parsed.episode == media.number {
            score += 10.0;
        }
    }

    score.round() as i64
}

/// Technical quality, 0..=100 nominal. Source intentionally caps above 50
/// so a REMUX outranks a higher-resolution WEB-DL.
pub fn quality_score(parsed: &ParsedRelease) -> i64 {
    let mut score = source_score(&parsed.source);
    score += resolution_score(&parsed.resolution);
    score += codec_score(&parsed.codec);
    if parsed.proper || parsed.repack {
        score += 5;
    }
    score
}

fn source_score(source: &str) -> i64 {
    match source {
        "REMUX" => 60,
        "BLURAY" => 35,
        "WEB-DL" => 25,
        "HDTV" => 15,
        "DVD" => 10,
        _ => 0,
    }
}

fn resolution_score(resolution: &str) -> i64 {
    match resolution {
        "2160P" => 30,
        "1080P" => 25,
        "720P" => 15,
        "480P" => 5,
        _ => 0,
    }
}

fn codec_score(codec: &str) -> i64 {
    match codec {
        "X265" => 15,
        "X264" => 12,
        "XVID" => 5,
        _ => 0,
    }
}

fn year_score(media_year: i64, parsed_year: i64) -> i64 {
    // A title without a year is unknown, not a mismatch.
    if parsed_year == 0 {
        return 0;
    }
    match (media_year - parsed_year).abs() {
        0 => 30,
        1 => 20,
        2 => 10,
        _ => 0,
    }
}

fn title_similarity(media_title: &str, parsed_title: &str) -> f64 {
    let a = normalize_title(media_title);
    let b = normalize_title(parsed_title);

    if a == b {
        return 1.0;
    }

    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 0.0;
    }

    let distance = levenshtein_distance(&a, &b) as f64;
    (1.0 - distance / max_len as f64).max(0.0)
}

fn normalize_title(title: &str) -> String {
    strip_accents(title)
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == ' ')
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn levenshtein_distance(left: &str, right: &str) -> usize {
    let left_chars: Vec<char> = left.chars().collect();
    let right_chars: Vec<char> = right.chars().collect();

    if left_chars.is_empty() {
        return right_chars.len();
    }
    if right_chars.is_empty() {
        return left_chars.len();
    }

    let mut previous_row: Vec<usize> = (0..=right_chars.len()).collect();
    let mut current_row: Vec<usize> = vec![0; right_chars.len() + 1];

    for (left_index, left_char) in left_chars.iter().enumerate() {
        current_row[0] = left_index + 1;
        for (right_index, right_char) in right_chars.iter().enumerate() {
            let insert_cost = current_row[right_index] + 1;
            let delete_cost = previous_row[right_index + 1] + 1;
            let replace_cost = previous_row[right_index] + usize::from(left_char != right_char);
            current_row[right_index + 1] = insert_cost.min(delete_cost).min(replace_cost);
        }
        std::mem::swap(&mut previous_row, &mut current_row);
    }

    previous_row[right_chars.len()]
}
