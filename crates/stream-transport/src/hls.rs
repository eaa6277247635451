//! HLS playlist adapter.
//!
//! Receive-only. Media decoding and rendering belong to the host; this
//! adapter follows the m3u8 playlist and reports what it finds:
//!
//! - `{"event":"hls:manifest_parsed","segments":N,"target_duration":T,"live":bool}`
//!   once the first playlist is fetched
//! - `{"event":"hls:segment","uri":"...","sequence":S}` for every segment,
//!   and for each new segment of a live playlist as it is re-polled
//!
//! A live playlist that gains `#EXT-X-ENDLIST` stops being polled. The
//! session stays open, as for a VOD playlist; closing it is up to the caller.

use crate::reader::ReaderTask;
use crate::request;
use async_trait::async_trait;
use reqwest::Url;
use serde_json::json;
use std::time::Duration;
use tenvis_stream_core::{
    AdapterSink, Capability, SessionConfig, SessionError, TransportAdapter, TransportError,
    TransportKind,
};
use tracing::{debug, trace, warn};

/// Used when a live playlist carries no `#EXT-X-TARGETDURATION`.
const DEFAULT_TARGET_DURATION: u64 = 6;

/// A parsed media playlist.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Playlist {
    pub(crate) target_duration: Option<u64>,
    pub(crate) media_sequence: u64,
    /// Segment URIs, resolved against the playlist URL.
    pub(crate) segments: Vec<String>,
    /// `#EXT-X-ENDLIST` seen; nothing more will be appended.
    pub(crate) ended: bool,
}

impl Playlist {
    pub(crate) fn parse(body: &str, base: &Url) -> Result<Self, TransportError> {
        let body = body.trim_start_matches('\u{feff}');
        let mut lines = body.lines().map(str::trim).filter(|l| !l.is_empty());
        if lines.next() != Some("#EXTM3U") {
            return Err(TransportError::Protocol(
                "playlist does not start with #EXTM3U".into(),
            ));
        }

        let mut playlist = Playlist {
            target_duration: None,
            media_sequence: 0,
            segments: Vec::new(),
            ended: false,
        };
        for line in lines {
            if let Some(value) = line.strip_prefix("#EXT-X-TARGETDURATION:") {
                playlist.target_duration = value.trim().parse().ok();
            } else if let Some(value) = line.strip_prefix("#EXT-X-MEDIA-SEQUENCE:") {
                playlist.media_sequence = value.trim().parse().unwrap_or(0);
            } else if line == "#EXT-X-ENDLIST" {
                playlist.ended = true;
            } else if !line.starts_with('#') {
                let uri = base
                    .join(line)
                    .map_or_else(|_| line.to_string(), |url| url.to_string());
                playlist.segments.push(uri);
            }
        }
        if playlist.end_sequence().is_none() {
            return Err(TransportError::Protocol(format!(
                "media sequence {} overflows with {} segments",
                playlist.media_sequence,
                playlist.segments.len()
            )));
        }
        Ok(playlist)
    }

    fn live(&self) -> bool {
        !self.ended
    }

    /// One past the last segment's sequence number, if it fits in a `u64`.
    fn end_sequence(&self) -> Option<u64> {
        u64::try_from(self.segments.len())
            .ok()
            .and_then(|len| self.media_sequence.checked_add(len))
    }

    /// Whether the playlist restarted below a sequence number already seen.
    fn rewound(&self, last: Option<u64>) -> bool {
        match (last, self.end_sequence()) {
            (Some(last), Some(end)) => end <= last,
            _ => false,
        }
    }

    /// Segments with a sequence number above `after`, with their numbers.
    fn segments_after(&self, after: Option<u64>) -> impl Iterator<Item = (u64, &str)> {
        // Segments drive the zip, so the range never steps past the last one
        self.segments
            .iter()
            .zip(self.media_sequence..)
            .map(|(uri, sequence)| (sequence, uri.as_str()))
            .filter(move |(sequence, _)| after.map_or(true, |last| *sequence > last))
    }
}

/// HLS transport.
pub struct HlsAdapter {
    url: Url,
    refresh: Option<Duration>,
    client: reqwest::Client,
    reader: ReaderTask,
}

impl HlsAdapter {
    /// Create an adapter from the session configuration.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidConfig`] for a non-HTTP address or a
    /// zero refresh interval.
    pub fn new(config: &SessionConfig) -> Result<Self, SessionError> {
        if config.hls.refresh_ms == Some(0) {
            return Err(SessionError::InvalidConfig(
                "hls.refresh_ms must be greater than 0".into(),
            ));
        }

        Ok(Self {
            url: request::parse_url(&config.address)?,
            refresh: config.hls.refresh_ms.map(Duration::from_millis),
            client: request::client()?,
            reader: ReaderTask::default(),
        })
    }
}

async fn fetch(client: &reqwest::Client, url: &Url) -> Result<Playlist, TransportError> {
    let response = request::send(client.get(url.clone())).await?;
    let body = response.text().await.map_err(request::receive_error)?;
    Playlist::parse(&body, url)
}

fn emit_segments(sink: &AdapterSink, playlist: &Playlist, after: Option<u64>) -> Option<u64> {
    let after = if playlist.rewound(after) {
        warn!(
            media_sequence = playlist.media_sequence,
            last_sequence = ?after,
            "Playlist sequence went backwards, starting over"
        );
        None
    } else {
        after
    };
    let mut last = after;
    for (sequence, uri) in playlist.segments_after(after) {
        sink.message(json!({ "event": "hls:segment", "uri": uri, "sequence": sequence }));
        last = Some(sequence);
    }
    last
}

#[async_trait]
impl TransportAdapter for HlsAdapter {
    fn kind(&self) -> TransportKind {
        TransportKind::Hls
    }

    fn capability(&self) -> Capability {
        Capability::ReceiveOnly
    }

    async fn open(&mut self, sink: AdapterSink) -> Result<(), TransportError> {
        self.reader.stop().await;

        let playlist = fetch(&self.client, &self.url).await?;
        let target_duration = playlist.target_duration.unwrap_or(DEFAULT_TARGET_DURATION);
        debug!(
            url = %self.url,
            segments = playlist.segments.len(),
            live = playlist.live(),
            "Playlist loaded"
        );

        sink.opened();
        sink.message(json!({
            "event": "hls:manifest_parsed",
            "segments": playlist.segments.len(),
            "target_duration": target_duration,
            "live": playlist.live(),
        }));
        let mut last = emit_segments(&sink, &playlist, None);

        if !playlist.live() {
            return Ok(());
        }

        let client = self.client.clone();
        let url = self.url.clone();
        let refresh = self
            .refresh
            .unwrap_or_else(|| Duration::from_secs(target_duration.max(1)));

        self.reader.spawn(async move {
            loop {
                tokio::time::sleep(refresh).await;
                match fetch(&client, &url).await {
                    Ok(playlist) => {
                        last = emit_segments(&sink, &playlist, last);
                        trace!(last_sequence = ?last, "Playlist refreshed");
                        if playlist.ended {
                            debug!(
                                url = %url,
                                last_sequence = ?last,
                                "Live playlist ended, polling stopped"
                            );
                            return;
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "Playlist refresh failed");
                        sink.error(e);
                    }
                }
            }
        });

        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.reader.stop().await;
        Ok(())
    }
}
