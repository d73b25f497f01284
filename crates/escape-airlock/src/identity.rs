// ABOUTME: Channel identity and endpoint URLs
// ABOUTME: Channel ids are unix seconds plus a random hex suffix

use rand::RngCore;

/// Length of the random hex suffix of a channel id.
const SUFFIX_HEX_LEN: usize = 6;

/// The id and base URL of one channel generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelIdentity {
    id: String,
    base_url: String,
}

impl ChannelIdentity {
    /// Generate a fresh identity for the ship at `base_url`.
    pub fn generate(base_url: &str) -> Self {
        Self {
            id: generate_channel_id(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `{base}/~/channel/{id}`
    pub fn channel_url(&self) -> String {
        format!("{}/~/channel/{}", self.base_url, self.id)
    }
}

/// `{base}/~/scry/{app}{path}.json`
pub fn scry_url(base_url: &str, app: &str, path: &str) -> String {
    format!(
        "{}/~/scry/{}{}.json",
        base_url.trim_end_matches('/'),
        app,
        leading_slash(path)
    )
}

/// `{base}/spider/{desk}/{input}/{thread}/{output}.json`
pub fn thread_url(
    base_url: &str,
    desk: &str,
    input_mark: &str,
    thread_name: &str,
    output_mark: &str,
) -> String {
    format!(
        "{}/spider/{}/{}/{}/{}.json",
        base_url.trim_end_matches('/'),
        desk,
        input_mark,
        thread_name,
        output_mark
    )
}

fn generate_channel_id() -> String {
    let mut bytes = [0u8; SUFFIX_HEX_LEN / 2];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("{}-{}", chrono::Utc::now().timestamp(), hex::encode(bytes))
}

fn leading_slash(path: &str) -> String {
    if path.is_empty() || path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}
