//! Image URL optimisation for known hosting providers.
//!
//! Drive share links are turned into direct, pre-sized view URLs and
//! googleusercontent URLs get sizing and quality parameters, so the image
//! store holds one reasonably small variant per picture.

use std::sync::OnceLock;

use regex::Regex;
use url::Url;

const IMAGE_WIDTH: &str = "800";
const IMAGE_HEIGHT: &str = "600";
const IMAGE_QUALITY: &str = "85";

fn drive_file_id(url: &Url) -> Option<String> {
    static FILE_PATH: OnceLock<Option<Regex>> = OnceLock::new();
    let pattern = FILE_PATH.get_or_init(|| Regex::new(r"/d/([^/]+)").ok());

    pattern
        .as_ref()
        .and_then(|re| re.captures(url.path()))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .or_else(|| {
            url.query_pairs()
                .find(|(k, _)| k == "id")
                .map(|(_, v)| v.into_owned())
        })
        .filter(|id| !id.is_empty())
}

/// Set `key=value`, replacing the first existing pair and dropping duplicates.
fn set_param(pairs: &mut Vec<(String, String)>, key: &str, value: &str) {
    match pairs.iter().position(|(k, _)| k == key) {
        Some(first) => {
            pairs[first].1 = value.to_string();
            let mut index = 0;
            pairs.retain(|(k, _)| {
                let keep = index <= first || k != key;
                index += 1;
                keep
            });
        }
        None => pairs.push((key.to_string(), value.to_string())),
    }
}

/// Rewrite an image URL, or return `None` when the host is not handled.
pub fn optimize_image_url(url: &Url) -> Option<Url> {
    let host = url.host_str()?.to_ascii_lowercase();

    if host.contains("drive.google.com") {
        let id = drive_file_id(url)?;
        let mut direct = Url::parse("https://drive.google.com/uc").ok()?;
        direct
            .query_pairs_mut()
            .append_pair("export", "view")
            .append_pair("id", &id)
            .append_pair("w", IMAGE_WIDTH)
            .append_pair("h", IMAGE_HEIGHT)
            .append_pair("fit", "crop");
        return Some(direct);
    }

    if host.contains("googleusercontent.com") {
        let mut pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        set_param(&mut pairs, "w", IMAGE_WIDTH);
        set_param(&mut pairs, "h", IMAGE_HEIGHT);
        set_param(&mut pairs, "fit", "crop");
        set_param(&mut pairs, "quality", IMAGE_QUALITY);

        let mut sized = url.clone();
        sized.query_pairs_mut().clear().extend_pairs(pairs);
        return Some(sized);
    }

    None
}
