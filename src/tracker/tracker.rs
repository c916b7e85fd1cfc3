use reqwest::{Client, Url};

use super::{announce::Announce, response::Response};
use super::URL_ENCODE_RESERVED;
use crate::error::tracker::Result;

/// The HTTP tracker for a swarm, from which we can request peers as well
/// as announce transfer progress.
pub struct Tracker {
    /// The HTTP client (from reqwest::Client).
    client: Client,
    url: Url,
}

impl Tracker {
    pub fn new(url: Url) -> Self {
        Tracker {
            client: Client::new(),
            url,
        }
    }

    /// Sends an announce request to the tracker with the specified
    /// parameters.
    ///
    /// This reports the swarm's current progress to the tracker and gets
    /// back the peer population we use for the stats counters.
    pub async fn announce(&self, params: Announce) -> Result<Response> {
        let mut query = vec![
            ("port", params.port.to_string()),
            ("downloaded", params.downloaded.to_string()),
            ("uploaded", params.uploaded.to_string()),
            ("left", params.left.to_string()),
            ("compact", "1".to_string()),
        ];

        if let Some(peer_count) = params.peer_count {
            query.push(("numwant", peer_count.to_string()));
        }
        if let Some(ip) = &params.ip {
            query.push(("ip", ip.to_string()));
        }
        if let Some(event) = &params.event {
            query.push(("event", event.as_str().to_string()));
        }

        let url = format!(
            "{url}\
            ?info_hash={swarm_id}\
            &peer_id={peer_id}",
            url = self.url,
            swarm_id = percent_encoding::percent_encode(&params.swarm_id, URL_ENCODE_RESERVED),
            peer_id = percent_encoding::percent_encode(&params.peer_id, URL_ENCODE_RESERVED)
        );

        let resp = self
            .client
            .get(&url)
            .query(&query)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;

        let resp = serde_bencoded::from_bytes(&resp)?;
        Ok(resp)
    }
}
