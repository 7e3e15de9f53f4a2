//! WebRTC media engine for WhatsApp calls.
//!
//! Each call gets its own UDP socket and a sans-IO [`Rtc`] answering the
//! caller's SDP offer. A driver task moves datagrams between the socket and
//! the `Rtc`, decodes the caller's Opus packets to 48 kHz mono PCM16 and
//! encodes the agent's PCM16 back to 20 ms Opus frames. The bridge only sees
//! the PCM side through a [`ChannelMediaConnection`](super::ChannelMediaConnection).

use async_trait::async_trait;
use audiopus::coder::{Decoder, Encoder};
use audiopus::{Application, Channels, MutSignals, SampleRate};
use bytes::Bytes;
use std::convert::TryFrom;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Instant;
use str0m::change::SdpOffer;
use str0m::format::Codec;
use str0m::media::{Frequency, MediaData, MediaKind, MediaTime, Mid, Pt};
use str0m::net::{Protocol, Receive};
use str0m::{Candidate, Event, IceConnectionState, Input, Output, Rtc, RtcError};
use tokio::net::UdpSocket;
use tracing::{debug, info, trace, warn};

use super::{
    DEFAULT_CHANNEL_CAPACITY, MediaConnector, MediaError, MediaPeer, MediaResult, MediaSession,
    channel_pair,
};
use crate::core::audio::AudioFormat;

/// PCM layout of call audio on the agent side of the engine.
pub const CALL_AUDIO_FORMAT: AudioFormat = AudioFormat::mono(OPUS_SAMPLE_RATE);

const OPUS_SAMPLE_RATE: u32 = 48_000;

/// Samples per 20 ms Opus frame at 48 kHz.
const FRAME_SAMPLES: usize = 960;

const MAX_OPUS_FRAME_BYTES: usize = 4000;

/// 120 ms at 48 kHz, the longest Opus frame.
const MAX_DECODED_SAMPLES: usize = 5760;

const UDP_BUFFER_SIZE: usize = 2000;

/// Address used to discover the outbound interface. No packet is sent.
const ROUTE_DISCOVERY_ADDR: &str = "8.8.8.8:80";

// =============================================================================
// Opus
// =============================================================================

/// Mono 48 kHz Opus encoder/decoder pair for one call.
pub struct OpusCodec {
    encoder: Encoder,
    decoder: Decoder,
}

impl OpusCodec {
    pub fn new() -> MediaResult<Self> {
        let encoder = Encoder::new(SampleRate::Hz48000, Channels::Mono, Application::Voip)
            .map_err(|e| MediaError::Codec(format!("Failed to create Opus encoder: {e}")))?;
        let decoder = Decoder::new(SampleRate::Hz48000, Channels::Mono)
            .map_err(|e| MediaError::Codec(format!("Failed to create Opus decoder: {e}")))?;
        Ok(Self { encoder, decoder })
    }

    /// Encode one frame. `pcm` must be a valid Opus frame size.
    pub fn encode(&mut self, pcm: &[i16]) -> MediaResult<Vec<u8>> {
        let mut output = vec![0u8; MAX_OPUS_FRAME_BYTES];
        let len = self
            .encoder
            .encode(pcm, &mut output)
            .map_err(|e| MediaError::Codec(format!("Opus encode failed: {e}")))?;
        output.truncate(len);
        Ok(output)
    }

    pub fn decode(&mut self, packet: &[u8]) -> MediaResult<Vec<i16>> {
        let mut output = vec![0i16; MAX_DECODED_SAMPLES];

        let packet = audiopus::packet::Packet::try_from(packet)
            .map_err(|e| MediaError::Codec(format!("Invalid Opus packet: {e}")))?;
        let signals = MutSignals::try_from(output.as_mut_slice())
            .map_err(|e| MediaError::Codec(format!("Invalid Opus output buffer: {e}")))?;

        let decoded = self
            .decoder
            .decode(Some(packet), signals, false)
            .map_err(|e| MediaError::Codec(format!("Opus decode failed: {e}")))?;
        output.truncate(decoded);
        Ok(output)
    }
}

/// Cuts a PCM16 byte stream into fixed-size sample frames, carrying the
/// remainder to the next chunk.
#[derive(Debug)]
pub struct PcmFramer {
    frame_bytes: usize,
    pending: Vec<u8>,
}

impl PcmFramer {
    pub fn new(frame_samples: usize) -> Self {
        Self {
            frame_bytes: frame_samples * 2,
            pending: Vec::new(),
        }
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<Vec<i16>> {
        self.pending.extend_from_slice(chunk);

        let complete = self.pending.len() - self.pending.len() % self.frame_bytes;
        let frames = self.pending[..complete]
            .chunks_exact(self.frame_bytes)
            .map(|frame| {
                frame
                    .chunks_exact(2)
                    .map(|s| i16::from_le_bytes([s[0], s[1]]))
                    .collect()
            })
            .collect();
        self.pending.drain(..complete);
        frames
    }

    pub fn pending_bytes(&self) -> usize {
        self.pending.len()
    }
}

// =============================================================================
// Connector
// =============================================================================

/// Addresses used for the per-call UDP sockets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WebRtcConfig {
    /// Interface the media sockets bind to.
    pub bind_ip: IpAddr,
    /// Address advertised in the ICE host candidate. Needed when the bind
    /// address is not reachable by WhatsApp, e.g. behind 1:1 NAT.
    pub public_ip: Option<IpAddr>,
}

impl Default for WebRtcConfig {
    fn default() -> Self {
        Self {
            bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            public_ip: None,
        }
    }
}

impl WebRtcConfig {
    /// Address to advertise: the public IP, else the bind IP, else the
    /// interface holding the default route.
    async fn candidate_ip(&self) -> MediaResult<IpAddr> {
        if let Some(ip) = self.public_ip {
            return Ok(ip);
        }
        if !self.bind_ip.is_unspecified() {
            return Ok(self.bind_ip);
        }

        let route = UdpSocket::bind(SocketAddr::new(self.bind_ip, 0))
            .await
            .map_err(transport)?;
        route.connect(ROUTE_DISCOVERY_ADDR).await.map_err(transport)?;
        Ok(route.local_addr().map_err(transport)?.ip())
    }
}

/// Answers WhatsApp SDP offers with a real WebRTC peer connection.
#[derive(Debug, Clone, Default)]
pub struct WebRtcMediaConnector {
    config: WebRtcConfig,
}

impl WebRtcMediaConnector {
    pub fn new(config: WebRtcConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl MediaConnector for WebRtcMediaConnector {
    async fn connect(&self, call_id: &str, sdp_offer: &str) -> MediaResult<MediaSession> {
        let offer = SdpOffer::from_sdp_string(sdp_offer)
            .map_err(|e| MediaError::Negotiation(format!("Invalid SDP offer: {e}")))?;

        let socket = UdpSocket::bind(SocketAddr::new(self.config.bind_ip, 0))
            .await
            .map_err(transport)?;
        let port = socket.local_addr().map_err(transport)?.port();
        let local = SocketAddr::new(self.config.candidate_ip().await?, port);

        let mut rtc = Rtc::new(Instant::now());
        let candidate = Candidate::host(local, "udp")
            .map_err(|e| MediaError::Negotiation(format!("Invalid ICE candidate {local}: {e}")))?;
        rtc.add_local_candidate(candidate);

        let answer = rtc
            .sdp_api()
            .accept_offer(offer)
            .map_err(|e| MediaError::Negotiation(format!("Failed to accept offer: {e}")))?;

        let (connection, peer) = channel_pair(CALL_AUDIO_FORMAT, DEFAULT_CHANNEL_CAPACITY);
        let driver = RtcDriver {
            call_id: call_id.to_string(),
            rtc,
            socket,
            local,
            peer,
            codec: OpusCodec::new()?,
            framer: PcmFramer::new(FRAME_SAMPLES),
            audio: None,
            rtp_offset: 0,
        };

        info!(call_id = %call_id, %local, "WebRTC offer answered");
        tokio::spawn(driver.run());

        Ok(MediaSession {
            connection: Arc::new(connection),
            sdp_answer: answer.to_sdp_string(),
        })
    }
}

fn transport(e: std::io::Error) -> MediaError {
    MediaError::Transport(e.to_string())
}

// =============================================================================
// Driver
// =============================================================================

/// Negotiated outbound audio track.
#[derive(Debug, Clone, Copy)]
struct AudioTrack {
    mid: Mid,
    pt: Pt,
    clock: Frequency,
}

/// Owns one call's `Rtc` and socket until either side ends the call.
struct RtcDriver {
    call_id: String,
    rtc: Rtc,
    socket: UdpSocket,
    local: SocketAddr,
    peer: MediaPeer,
    codec: OpusCodec,
    framer: PcmFramer,
    audio: Option<AudioTrack>,
    rtp_offset: u64,
}

impl RtcDriver {
    async fn run(mut self) {
        let mut buf = vec![0u8; UDP_BUFFER_SIZE];

        loop {
            let deadline = match self.poll() {
                Ok(Some(deadline)) => deadline,
                Ok(None) => break,
                Err(e) => {
                    warn!(call_id = %self.call_id, "WebRTC error: {e}");
                    break;
                }
            };
            let wait = deadline.saturating_duration_since(Instant::now());

            tokio::select! {
                received = self.socket.recv_from(&mut buf) => match received {
                    Ok((len, source)) => {
                        if let Err(e) = self.receive(source, &buf[..len]) {
                            warn!(call_id = %self.call_id, "WebRTC input error: {e}");
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(call_id = %self.call_id, "Media socket error: {e}");
                        break;
                    }
                },

                frame = self.peer.recv() => match frame {
                    Some(frame) => self.play(&frame),
                    None => {
                        debug!(call_id = %self.call_id, "Agent closed media, ending peer connection");
                        self.rtc.disconnect();
                        break;
                    }
                },

                _ = tokio::time::sleep(wait) => {
                    if let Err(e) = self.rtc.handle_input(Input::Timeout(Instant::now())) {
                        warn!(call_id = %self.call_id, "WebRTC timeout handling failed: {e}");
                        break;
                    }
                }
            }
        }

        info!(call_id = %self.call_id, "WebRTC media ended");
        // Dropping the peer ends the caller stream seen by the bridge
        self.peer.hang_up();
    }

    /// Drain pending output. Returns the next wake-up time, or `None` once
    /// the peer connection is gone.
    fn poll(&mut self) -> Result<Option<Instant>, RtcError> {
        loop {
            if !self.rtc.is_alive() {
                return Ok(None);
            }

            match self.rtc.poll_output()? {
                Output::Timeout(deadline) => return Ok(Some(deadline)),
                Output::Transmit(transmit) => {
                    if let Err(e) = self
                        .socket
                        .try_send_to(&transmit.contents, transmit.destination)
                    {
                        trace!(call_id = %self.call_id, "Dropped outgoing datagram: {e}");
                    }
                }
                Output::Event(event) => self.handle_event(event),
            }
        }
    }

    fn receive(&mut self, source: SocketAddr, contents: &[u8]) -> Result<(), RtcError> {
        let Ok(receive) = Receive::new(Protocol::Udp, source, self.local, contents) else {
            trace!(call_id = %self.call_id, "Ignoring unrecognised datagram from {source}");
            return Ok(());
        };

        let input = Input::Receive(Instant::now(), receive);
        if self.rtc.accepts(&input) {
            self.rtc.handle_input(input)?;
        }
        Ok(())
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::Connected => info!(call_id = %self.call_id, "WebRTC connected"),
            Event::IceConnectionStateChange(IceConnectionState::Disconnected) => {
                info!(call_id = %self.call_id, "ICE disconnected");
                self.rtc.disconnect();
            }
            Event::MediaAdded(added) if added.kind == MediaKind::Audio => {
                self.audio = self.audio_track(added.mid);
                if self.audio.is_none() {
                    warn!(call_id = %self.call_id, "No Opus payload negotiated for audio");
                }
            }
            Event::MediaData(data) => self.deliver(data),
            _ => {}
        }
    }

    fn audio_track(&mut self, mid: Mid) -> Option<AudioTrack> {
        let writer = self.rtc.writer(mid)?;
        let params = writer
            .payload_params()
            .find(|p| p.spec().codec == Codec::Opus)?;
        Some(AudioTrack {
            mid,
            pt: params.pt(),
            clock: params.spec().clock_rate,
        })
    }

    /// Caller audio: Opus packet to PCM16 for the bridge.
    fn deliver(&mut self, data: MediaData) {
        let samples = match self.codec.decode(&data.data) {
            Ok(samples) => samples,
            Err(e) => {
                trace!(call_id = %self.call_id, "{e}");
                return;
            }
        };

        let pcm: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        if let Err(e) = self.peer.try_send(Bytes::from(pcm)) {
            trace!(call_id = %self.call_id, "Dropped caller frame: {e}");
        }
    }

    /// Agent audio: PCM16 to 20 ms Opus frames on the audio track.
    fn play(&mut self, pcm: &[u8]) {
        let Some(track) = self.audio else {
            trace!(call_id = %self.call_id, "Audio track not negotiated yet, dropping frame");
            return;
        };

        for frame in self.framer.push(pcm) {
            let packet = match self.codec.encode(&frame) {
                Ok(packet) => packet,
                Err(e) => {
                    warn!(call_id = %self.call_id, "{e}");
                    continue;
                }
            };

            let ticks = frame.len() as u64 * track.clock.get() as u64 / OPUS_SAMPLE_RATE as u64;
            let rtp_time = MediaTime::new(self.rtp_offset, track.clock);
            self.rtp_offset += ticks;

            let Some(writer) = self.rtc.writer(track.mid) else {
                return;
            };
            if let Err(e) = writer.write(track.pt, Instant::now(), rtp_time, packet) {
                warn!(call_id = %self.call_id, "Audio track write failed: {e}");
                return;
            }
        }
    }
}
