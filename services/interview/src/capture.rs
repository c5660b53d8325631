use crate::audio;
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use interview_core::capture::{CaptureEvent, SpeechCapture};
use interview_core::language::LanguageMode;
use rubato::Resampler;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

const TRANSCRIPTION_URL: &str = "wss://api.openai.com/v1/realtime?intent=transcription";

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Continuous speech capture over a realtime transcription websocket.
///
/// Microphone frames arrive on a channel from the cpal callback, get
/// resampled to 24 kHz PCM16 and streamed up as base64 `input_audio_buffer`
/// appends; transcription events coming back are folded into a
/// full-accumulated-text snapshot and republished on every change.
pub struct RealtimeCapture {
    api_key: String,
    model: String,
    language: LanguageMode,
    supported: bool,
    listening: Arc<AtomicBool>,
    /// Bumped on every `start()`; a reader task from a superseded connection
    /// must not report an unexpected end for the current one.
    generation: Arc<AtomicU64>,
    sink: Arc<tokio::sync::Mutex<Option<WsSink>>>,
    events: mpsc::Sender<CaptureEvent>,
}

impl RealtimeCapture {
    pub fn new(
        api_key: String,
        model: String,
        language: LanguageMode,
        supported: bool,
        audio_rx: mpsc::Receiver<Vec<f32>>,
        input_sample_rate: f64,
        events: mpsc::Sender<CaptureEvent>,
    ) -> Self {
        let capture = Self {
            api_key,
            model,
            language,
            supported,
            listening: Arc::new(AtomicBool::new(false)),
            generation: Arc::new(AtomicU64::new(0)),
            sink: Arc::new(tokio::sync::Mutex::new(None)),
            events,
        };
        capture.spawn_audio_pump(audio_rx, input_sample_rate);
        capture
    }

    /// Long-lived writer: drains microphone frames for the whole process
    /// lifetime and forwards them whenever a websocket is attached and the
    /// adapter is listening.
    fn spawn_audio_pump(&self, mut audio_rx: mpsc::Receiver<Vec<f32>>, input_sample_rate: f64) {
        let sink = Arc::clone(&self.sink);
        let listening = Arc::clone(&self.listening);
        tokio::spawn(async move {
            let mut resampler = match audio::create_resampler(
                input_sample_rate,
                audio::CAPTURE_PCM16_SAMPLE_RATE,
                audio::INPUT_CHUNK_SIZE,
            ) {
                Ok(resampler) => resampler,
                Err(e) => {
                    tracing::error!("failed to build capture resampler: {e:#}");
                    return;
                }
            };
            let mut pending: VecDeque<f32> = VecDeque::with_capacity(audio::INPUT_CHUNK_SIZE * 2);

            while let Some(frame) = audio_rx.recv().await {
                if !listening.load(Ordering::SeqCst) {
                    pending.clear();
                    continue;
                }
                pending.extend(frame);

                let mut resampled: Vec<f32> = Vec::new();
                while pending.len() >= audio::INPUT_CHUNK_SIZE {
                    let block: Vec<f32> = pending.drain(..audio::INPUT_CHUNK_SIZE).collect();
                    if let Ok(out) = resampler.process(&[block.as_slice()], None) {
                        if let Some(out) = out.first() {
                            resampled.extend(out.iter().copied());
                        }
                    }
                }
                if resampled.is_empty() {
                    continue;
                }

                let payload = serde_json::json!({
                    "type": "input_audio_buffer.append",
                    "audio": audio::encode_f32(&resampled),
                });
                let mut guard = sink.lock().await;
                if let Some(ws) = guard.as_mut() {
                    if let Err(e) = ws.send(Message::Text(payload.to_string())).await {
                        tracing::warn!("failed to send audio frame: {e}");
                    }
                }
            }
        });
    }
}

#[async_trait]
impl SpeechCapture for RealtimeCapture {
    fn is_supported(&self) -> bool {
        self.supported
    }

    fn is_listening(&self) -> bool {
        self.listening.load(Ordering::SeqCst)
    }

    async fn start(&mut self) -> Result<()> {
        if !self.supported {
            anyhow::bail!("speech capture is not supported on this device");
        }
        if self.listening.load(Ordering::SeqCst) {
            return Ok(());
        }

        let request = build_request(&self.api_key)?;
        let (ws, _) = connect_async(request)
            .await
            .context("failed to connect to the transcription endpoint")?;
        let (mut write, read) = ws.split();

        let configure = serde_json::json!({
            "type": "transcription_session.update",
            "session": {
                "input_audio_format": "pcm16",
                "input_audio_transcription": {
                    "model": self.model,
                    "language": self.language.tag(),
                },
                "turn_detection": { "type": "server_vad" },
            },
        });
        write
            .send(Message::Text(configure.to_string()))
            .await
            .context("failed to configure the transcription session")?;

        *self.sink.lock().await = Some(write);
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.listening.store(true, Ordering::SeqCst);

        let events = self.events.clone();
        let listening = Arc::clone(&self.listening);
        let generations = Arc::clone(&self.generation);
        tokio::spawn(async move {
            let mut read = read;
            let mut committed = String::new();
            let mut partial = String::new();

            while let Some(message) = read.next().await {
                match message {
                    Ok(Message::Text(text)) => {
                        if let Some(snapshot) =
                            apply_server_event(&mut committed, &mut partial, &text)
                        {
                            if events.send(CaptureEvent::Transcript(snapshot)).await.is_err() {
                                return;
                            }
                        }
                    }
                    Ok(Message::Close(reason)) => {
                        tracing::info!("transcription stream closed: {reason:?}");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!("transcription stream error: {e}");
                        if generations.load(Ordering::SeqCst) == generation
                            && listening.swap(false, Ordering::SeqCst)
                        {
                            let _ = events.send(CaptureEvent::Error(e.to_string())).await;
                        }
                        return;
                    }
                }
            }
            // The stream ended without a stop() request from our side.
            if generations.load(Ordering::SeqCst) == generation
                && listening.swap(false, Ordering::SeqCst)
            {
                let _ = events.send(CaptureEvent::Ended).await;
            }
        });

        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        // Flip the flag first so the reader winding down does not report an
        // unexpected end; the last accumulated text stays with the session.
        self.listening.store(false, Ordering::SeqCst);
        if let Some(mut ws) = self.sink.lock().await.take() {
            if let Err(e) = ws.send(Message::Close(None)).await {
                tracing::debug!("close frame failed: {e}");
            }
        }
        Ok(())
    }
}

fn build_request(api_key: &str) -> Result<Request> {
    let mut request = TRANSCRIPTION_URL
        .into_client_request()
        .context("invalid transcription endpoint url")?;
    request
        .headers_mut()
        .insert("Authorization", format!("Bearer {api_key}").parse()?);
    request.headers_mut().insert("OpenAI-Beta", "realtime=v1".parse()?);
    Ok(request)
}

/// Fold one server event into the accumulated transcript. Returns the new
/// full snapshot when the visible text changed.
fn apply_server_event(
    committed: &mut String,
    partial: &mut String,
    raw: &str,
) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(raw).ok()?;
    match value.get("type").and_then(|t| t.as_str())? {
        "conversation.item.input_audio_transcription.delta" => {
            let delta = value.get("delta").and_then(|d| d.as_str())?;
            partial.push_str(delta);
        }
        "conversation.item.input_audio_transcription.completed" => {
            let transcript = value.get("transcript").and_then(|t| t.as_str())?;
            if !committed.is_empty() {
                committed.push(' ');
            }
            committed.push_str(transcript.trim());
            partial.clear();
        }
        "error" => {
            tracing::warn!(payload = %raw, "transcription error event");
            return None;
        }
        _ => return None,
    }

    let mut snapshot = committed.clone();
    if !partial.is_empty() {
        if !snapshot.is_empty() {
            snapshot.push(' ');
        }
        snapshot.push_str(partial);
    }
    Some(snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deltas_extend_and_completions_commit() {
        let mut committed = String::new();
        let mut partial = String::new();

        let snap = apply_server_event(
            &mut committed,
            &mut partial,
            r#"{"type":"conversation.item.input_audio_transcription.delta","delta":"I am"}"#,
        );
        assert_eq!(snap.as_deref(), Some("I am"));

        let snap = apply_server_event(
            &mut committed,
            &mut partial,
            r#"{"type":"conversation.item.input_audio_transcription.delta","delta":" an engineer"}"#,
        );
        assert_eq!(snap.as_deref(), Some("I am an engineer"));

        let snap = apply_server_event(
            &mut committed,
            &mut partial,
            r#"{"type":"conversation.item.input_audio_transcription.completed","transcript":"I am an engineer."}"#,
        );
        assert_eq!(snap.as_deref(), Some("I am an engineer."));

        // The next utterance extends the committed text.
        let snap = apply_server_event(
            &mut committed,
            &mut partial,
            r#"{"type":"conversation.item.input_audio_transcription.delta","delta":"I like"}"#,
        );
        assert_eq!(snap.as_deref(), Some("I am an engineer. I like"));
    }

    #[test]
    fn unrelated_and_malformed_events_are_ignored() {
        let mut committed = String::new();
        let mut partial = String::new();

        assert!(apply_server_event(
            &mut committed,
            &mut partial,
            r#"{"type":"transcription_session.updated"}"#
        )
        .is_none());
        assert!(apply_server_event(&mut committed, &mut partial, "not json").is_none());
        assert!(apply_server_event(
            &mut committed,
            &mut partial,
            r#"{"type":"error","error":{"message":"bad"}}"#
        )
        .is_none());
        assert!(committed.is_empty());
        assert!(partial.is_empty());
    }
}
