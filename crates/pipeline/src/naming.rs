//! Remote file names derived from the meeting title.

use chrono::{DateTime, Utc};
use meetrec_protocol::constants::{DEFAULT_EXTENSION, DEFAULT_TITLE, MAX_TITLE_LEN};

/// Strips a title down to ASCII letters, digits and single spaces.
///
/// Accented Latin letters are folded to their base letter, everything else
/// that is not alphanumeric or whitespace is dropped, whitespace runs become
/// one space and the result is cut to [`MAX_TITLE_LEN`] characters. Falls
/// back to [`DEFAULT_TITLE`] when nothing is left.
pub fn sanitize_title(title: &str) -> String {
    let folded: String = title
        .chars()
        .filter_map(|c| {
            if c.is_ascii_alphanumeric() || c.is_whitespace() {
                Some(c)
            } else {
                fold_accent(c)
            }
        })
        .collect();

    let mut clean = folded.split_whitespace().collect::<Vec<_>>().join(" ");
    clean.truncate(MAX_TITLE_LEN);
    let clean = clean.trim_end();

    if clean.is_empty() {
        DEFAULT_TITLE.to_string()
    } else {
        clean.to_string()
    }
}

fn fold_accent(c: char) -> Option<char> {
    let base = match c {
        'À' | 'Á' | 'Â' | 'Ã' | 'Ä' | 'Å' => 'A',
        'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' => 'a',
        'Ç' => 'C',
        'ç' => 'c',
        'È' | 'É' | 'Ê' | 'Ë' => 'E',
        'è' | 'é' | 'ê' | 'ë' => 'e',
        'Ì' | 'Í' | 'Î' | 'Ï' => 'I',
        'ì' | 'í' | 'î' | 'ï' => 'i',
        'Ñ' => 'N',
        'ñ' => 'n',
        'Ò' | 'Ó' | 'Ô' | 'Õ' | 'Ö' => 'O',
        'ò' | 'ó' | 'ô' | 'õ' | 'ö' => 'o',
        'Ù' | 'Ú' | 'Û' | 'Ü' => 'U',
        'ù' | 'ú' | 'û' | 'ü' => 'u',
        'Ý' => 'Y',
        'ý' | 'ÿ' => 'y',
        _ => return None,
    };
    Some(base)
}

/// Display name declared to the primary target: `<title>_<yyyyMMdd_HHmmss>`.
pub fn display_name(clean_title: &str, at: DateTime<Utc>) -> String {
    format!("{clean_title}_{}", at.format("%Y%m%d_%H%M%S"))
}

/// File extension for a recording MIME type, including the dot.
pub fn extension_for_mime(mime_type: &str) -> &'static str {
    let essence = mime_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    match essence.as_str() {
        "audio/webm" | "video/webm" => ".webm",
        "audio/mpeg" | "audio/mp3" => ".mp3",
        "audio/wav" | "audio/x-wav" | "audio/wave" => ".wav",
        "audio/ogg" => ".ogg",
        "audio/mp4" | "audio/x-m4a" => ".m4a",
        _ => DEFAULT_EXTENSION,
    }
}

/// File name used on the secondary target: `<title><extension>`.
pub fn secondary_file_name(clean_title: &str, mime_type: &str) -> String {
    format!("{clean_title}{}", extension_for_mime(mime_type))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn folds_accents_and_drops_symbols() {
        assert_eq!(
            sanitize_title("Reunião de  Planejamento: Q3/2025 (ação)"),
            "Reuniao de Planejamento Q32025 acao"
        );
    }

    #[test]
    fn blank_titles_fall_back() {
        assert_eq!(sanitize_title(""), "Reuniao");
        assert_eq!(sanitize_title("   "), "Reuniao");
        assert_eq!(sanitize_title("!!!"), "Reuniao");
    }

    #[test]
    fn long_titles_are_cut() {
        let long = "palavra ".repeat(20);
        let clean = sanitize_title(&long);
        assert!(clean.len() <= 80);
        assert!(!clean.ends_with(' '));
        assert!(clean.starts_with("palavra palavra"));
    }

    #[test]
    fn display_name_timestamp() {
        let at = Utc.with_ymd_and_hms(2025, 3, 7, 9, 5, 1).unwrap();
        assert_eq!(display_name("Weekly", at), "Weekly_20250307_090501");
    }

    #[test]
    fn extensions_by_mime() {
        assert_eq!(extension_for_mime("audio/webm;codecs=opus"), ".webm");
        assert_eq!(extension_for_mime("audio/mpeg"), ".mp3");
        assert_eq!(extension_for_mime("audio/mp3"), ".mp3");
        assert_eq!(extension_for_mime("audio/wav"), ".wav");
        assert_eq!(extension_for_mime("audio/ogg"), ".ogg");
        assert_eq!(extension_for_mime("audio/x-m4a"), ".m4a");
        assert_eq!(extension_for_mime("AUDIO/MP4"), ".m4a");
        assert_eq!(extension_for_mime("application/octet-stream"), ".webm");
        assert_eq!(secondary_file_name("Weekly", "audio/ogg"), "Weekly.ogg");
    }
}
