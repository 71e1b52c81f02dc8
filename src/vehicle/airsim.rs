//! AirSim multirotor session.
//!
//! This module provides `AirSimSession`, a client for the AirSim simulator's
//! msgpack-rpc endpoint (default port 41451).
//!
//! Wire format (msgpack arrays):
//! - request:      `[0, msgid, method, params]`, answered by `[1, msgid, error, result]`
//! - notification: `[2, method, params]`, never answered
//!
//! Setup and teardown calls are requests and block until AirSim answers. Motion
//! commands are notifications: the write returns as soon as the bytes are on the
//! socket, and the simulator executes the command on its own schedule.

use anyhow::{anyhow, Context, Result};
use serde::de::{self, DeserializeOwned, IgnoredAny, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::io::Write;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use crate::config::VehicleSettings;
use crate::frame::{Frame, RGB_CHANNELS};
use crate::TeleopError;

use super::{connection_error, VehicleSession};

const MSG_REQUEST: u8 = 0;
const MSG_RESPONSE: u8 = 1;
const MSG_NOTIFICATION: u8 = 2;

/// AirSim `ImageType::Scene`.
const IMAGE_TYPE_SCENE: i32 = 0;
/// AirSim `DrivetrainType::MaxDegreeOfFreedom`.
const DRIVETRAIN_MAX_DOF: i32 = 0;

const TAKEOFF_TIMEOUT_SECS: f32 = 20.0;
const LAND_TIMEOUT_SECS: f32 = 60.0;
/// Extra socket wait on top of a server-side timeout.
const RPC_GRACE: Duration = Duration::from_secs(5);

#[derive(Serialize)]
struct YawMode {
    is_rate: bool,
    yaw_or_rate: f32,
}

impl YawMode {
    fn hold_heading() -> Self {
        Self {
            is_rate: true,
            yaw_or_rate: 0.0,
        }
    }
}

#[derive(Serialize)]
struct ImageRequest<'a> {
    camera_name: &'a str,
    image_type: i32,
    pixels_as_float: bool,
    compress: bool,
}

#[derive(Deserialize, Default)]
struct ImageResponse {
    #[serde(default, deserialize_with = "pixel_bytes")]
    image_data_uint8: Vec<u8>,
    #[serde(default)]
    width: i32,
    #[serde(default)]
    height: i32,
}

/// Error slot of a response. AirSim sends a string; anything else is kept opaque.
#[derive(Deserialize)]
#[serde(untagged)]
enum RpcFault {
    Message(String),
    Other(IgnoredAny),
}

impl fmt::Display for RpcFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RpcFault::Message(msg) => write!(f, "{}", msg),
            RpcFault::Other(_) => write!(f, "non-text rpc error"),
        }
    }
}

/// Minimal msgpack-rpc client over one TCP stream.
struct RpcClient {
    stream: TcpStream,
    addr: String,
    next_id: u32,
    default_timeout: Duration,
}

impl RpcClient {
    fn connect(addr: &str, timeout: Duration) -> Result<Self> {
        let candidates: Vec<SocketAddr> = addr
            .to_socket_addrs()
            .with_context(|| format!("resolve vehicle address {}", addr))?
            .collect();
        let mut last_err = None;
        for candidate in candidates {
            match TcpStream::connect_timeout(&candidate, timeout) {
                Ok(stream) => {
                    stream.set_nodelay(true).context("set TCP_NODELAY")?;
                    stream
                        .set_read_timeout(Some(timeout))
                        .context("set rpc read timeout")?;
                    stream
                        .set_write_timeout(Some(timeout))
                        .context("set rpc write timeout")?;
                    return Ok(Self {
                        stream,
                        addr: addr.to_string(),
                        next_id: 0,
                        default_timeout: timeout,
                    });
                }
                Err(e) => last_err = Some(e),
            }
        }
        match last_err {
            Some(e) => Err(anyhow!("connect to {}: {}", addr, e)),
            None => Err(anyhow!("vehicle address {} resolved to nothing", addr)),
        }
    }

    /// Blocking request. Returns the result slot (`None` for void methods).
    fn call<P, R>(&mut self, method: &str, params: P) -> Result<Option<R>>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let timeout = self.default_timeout;
        self.call_with_timeout(method, params, timeout)
    }

    fn call_with_timeout<P, R>(&mut self, method: &str, params: P, timeout: Duration) -> Result<Option<R>>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);

        let request = rmp_serde::encode::to_vec_named(&(MSG_REQUEST, id, method, params))
            .with_context(|| format!("encode {} request", method))?;
        self.stream
            .set_read_timeout(Some(timeout))
            .context("set rpc read timeout")?;
        self.stream
            .write_all(&request)
            .with_context(|| format!("send {} to {}", method, self.addr))?;

        let outcome = loop {
            let (kind, resp_id, fault, result): (u8, u32, Option<RpcFault>, Option<R>) =
                rmp_serde::from_read(&mut self.stream)
                    .with_context(|| format!("read {} response from {}", method, self.addr))?;
            if kind != MSG_RESPONSE {
                break Err(anyhow!("unexpected msgpack-rpc message type {}", kind));
            }
            if resp_id != id {
                log::debug!("dropping stale rpc response id={} (waiting for {})", resp_id, id);
                continue;
            }
            break match fault {
                Some(fault) => Err(anyhow!("{} failed: {}", method, fault)),
                None => Ok(result),
            };
        };

        self.stream
            .set_read_timeout(Some(self.default_timeout))
            .context("restore rpc read timeout")?;
        outcome
    }

    /// One-way notification. Returns once the message is written.
    fn notify<P: Serialize>(&mut self, method: &str, params: P) -> Result<()> {
        let message = rmp_serde::encode::to_vec_named(&(MSG_NOTIFICATION, method, params))
            .with_context(|| format!("encode {} notification", method))?;
        self.stream.write_all(&message).map_err(|e| {
            TeleopError::LinkLost(format!("send {} to {}: {}", method, self.addr, e)).into()
        })
    }
}

/// Session with one AirSim multirotor.
pub struct AirSimSession {
    rpc: RpcClient,
    vehicle_name: String,
}

impl AirSimSession {
    /// Connect, confirm the link, enable API control and arm.
    pub fn connect(settings: &VehicleSettings) -> Result<Self> {
        Self::establish(settings).map_err(connection_error)
    }

    fn establish(settings: &VehicleSettings) -> Result<Self> {
        let rpc = RpcClient::connect(&settings.address, settings.rpc_timeout)?;
        let mut session = Self {
            rpc,
            vehicle_name: settings.name.clone(),
        };

        let alive: Option<bool> = session.rpc.call("ping", ())?;
        if alive != Some(true) {
            return Err(TeleopError::Connection(format!(
                "{} did not answer ping",
                settings.address
            ))
            .into());
        }
        session
            .rpc
            .call::<_, IgnoredAny>("enableApiControl", (true, &session.vehicle_name))?;
        let armed: Option<bool> = session
            .rpc
            .call("armDisarm", (true, &session.vehicle_name))?;
        if armed != Some(true) {
            return Err(TeleopError::Connection("vehicle refused to arm".to_string()).into());
        }
        log::info!("AirSimSession: connected to {} and armed", settings.address);
        Ok(session)
    }
}

impl VehicleSession for AirSimSession {
    fn describe(&self) -> String {
        if self.vehicle_name.is_empty() {
            format!("airsim {}", self.rpc.addr)
        } else {
            format!("airsim {} ({})", self.rpc.addr, self.vehicle_name)
        }
    }

    fn takeoff(&mut self) -> Result<()> {
        let timeout = Duration::from_secs_f32(TAKEOFF_TIMEOUT_SECS) + RPC_GRACE;
        self.rpc.call_with_timeout::<_, IgnoredAny>(
            "takeoff",
            (TAKEOFF_TIMEOUT_SECS, &self.vehicle_name),
            timeout,
        )?;
        Ok(())
    }

    fn move_to_altitude(
        &mut self,
        altitude_m: f32,
        velocity: f32,
        timeout: Duration,
    ) -> Result<()> {
        // NED frame: altitude above the start point is negative z.
        self.rpc.call_with_timeout::<_, IgnoredAny>(
            "moveToPosition",
            (
                0.0f32,
                0.0f32,
                -altitude_m,
                velocity,
                timeout.as_secs_f32(),
                DRIVETRAIN_MAX_DOF,
                YawMode::hold_heading(),
                -1.0f32,
                1.0f32,
                &self.vehicle_name,
            ),
            timeout + RPC_GRACE,
        )?;
        Ok(())
    }

    fn capture_frame(&mut self, camera: &str) -> Result<Option<Frame>> {
        let requests = [ImageRequest {
            camera_name: camera,
            image_type: IMAGE_TYPE_SCENE,
            pixels_as_float: false,
            compress: false,
        }];
        let responses: Option<Vec<ImageResponse>> = self
            .rpc
            .call("simGetImages", (requests, &self.vehicle_name, false))?;
        let Some(response) = responses.and_then(|r| r.into_iter().next()) else {
            return Ok(None);
        };
        Ok(decode_scene_image(response))
    }

    fn move_velocity_body(
        &mut self,
        vx: f32,
        vy: f32,
        vz: f32,
        duration: Duration,
    ) -> Result<()> {
        self.rpc.notify(
            "moveByVelocityBodyFrame",
            (
                vx,
                vy,
                vz,
                duration.as_secs_f32(),
                DRIVETRAIN_MAX_DOF,
                YawMode::hold_heading(),
                &self.vehicle_name,
            ),
        )
    }

    fn rotate_yaw_rate(&mut self, rate_deg_s: f32, duration: Duration) -> Result<()> {
        self.rpc.notify(
            "rotateByYawRate",
            (rate_deg_s, duration.as_secs_f32(), &self.vehicle_name),
        )
    }

    fn cancel_last_task(&mut self) -> Result<()> {
        self.rpc.notify("cancelLastTask", (&self.vehicle_name,))
    }

    fn land(&mut self) -> Result<()> {
        let timeout = Duration::from_secs_f32(LAND_TIMEOUT_SECS) + RPC_GRACE;
        self.rpc.call_with_timeout::<_, IgnoredAny>(
            "land",
            (LAND_TIMEOUT_SECS, &self.vehicle_name),
            timeout,
        )?;
        Ok(())
    }

    fn disarm(&mut self) -> Result<()> {
        let disarmed: Option<bool> = self.rpc.call("armDisarm", (false, &self.vehicle_name))?;
        if disarmed == Some(false) {
            return Err(anyhow!("vehicle refused to disarm"));
        }
        Ok(())
    }

    fn release_control(&mut self) -> Result<()> {
        self.rpc
            .call::<_, IgnoredAny>("enableApiControl", (false, &self.vehicle_name))?;
        Ok(())
    }
}

/// Uncompressed scene images arrive as BGR (older servers: BGRA).
fn decode_scene_image(response: ImageResponse) -> Option<Frame> {
    if response.width <= 0 || response.height <= 0 || response.image_data_uint8.is_empty() {
        return None;
    }
    let (width, height) = (response.width as u32, response.height as u32);
    let pixels = width as usize * height as usize;
    let data = response.image_data_uint8;
    let bgr = if data.len() == pixels * RGB_CHANNELS {
        data
    } else if data.len() == pixels * 4 {
        data.chunks_exact(4).flat_map(|px| [px[0], px[1], px[2]]).collect()
    } else {
        log::warn!(
            "scene image size mismatch: {} bytes for {}x{}",
            data.len(),
            width,
            height
        );
        return None;
    };
    match Frame::from_bgr(bgr, width, height) {
        Ok(frame) => Some(frame),
        Err(e) => {
            log::warn!("discarding malformed scene image: {}", e);
            None
        }
    }
}

/// Accepts msgpack `bin` or an array of integers.
fn pixel_bytes<'de, D>(deserializer: D) -> std::result::Result<Vec<u8>, D::Error>
where
    D: Deserializer<'de>,
{
    struct PixelBytes;

    impl<'de> Visitor<'de> for PixelBytes {
        type Value = Vec<u8>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a byte buffer")
        }

        fn visit_bytes<E: de::Error>(self, v: &[u8]) -> std::result::Result<Vec<u8>, E> {
            Ok(v.to_vec())
        }

        fn visit_byte_buf<E: de::Error>(self, v: Vec<u8>) -> std::result::Result<Vec<u8>, E> {
            Ok(v)
        }

        fn visit_unit<E: de::Error>(self) -> std::result::Result<Vec<u8>, E> {
            Ok(Vec::new())
        }

        fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> std::result::Result<Vec<u8>, A::Error> {
            let mut out = Vec::with_capacity(seq.size_hint().unwrap_or(0));
            while let Some(byte) = seq.next_element::<u8>()? {
                out.push(byte);
            }
            Ok(out)
        }
    }

    deserializer.deserialize_any(PixelBytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_scene_image_is_empty_capture() {
        assert!(decode_scene_image(ImageResponse::default()).is_none());
        let truncated = ImageResponse {
            image_data_uint8: vec![0; 5],
            width: 2,
            height: 2,
        };
        assert!(decode_scene_image(truncated).is_none());
    }

    #[test]
    fn bgra_scene_image_drops_alpha() {
        let response = ImageResponse {
            image_data_uint8: vec![1, 2, 3, 255, 4, 5, 6, 255],
            width: 2,
            height: 1,
        };
        let frame = decode_scene_image(response).unwrap();
        assert_eq!(frame.pixel(0, 0), Some([3, 2, 1]));
        assert_eq!(frame.pixel(1, 0), Some([6, 5, 4]));
    }

    #[test]
    fn image_response_decodes_from_named_map() {
        #[derive(Serialize)]
        struct Wire {
            #[serde(with = "bin")]
            image_data_uint8: Vec<u8>,
            width: i32,
            height: i32,
            camera_name: String,
        }
        mod bin {
            pub fn serialize<S: serde::Serializer>(v: &[u8], s: S) -> Result<S::Ok, S::Error> {
                s.serialize_bytes(v)
            }
        }
        let bytes = rmp_serde::to_vec_named(&Wire {
            image_data_uint8: vec![9, 8, 7],
            width: 1,
            height: 1,
            camera_name: "front_center".to_string(),
        })
        .unwrap();
        let response: ImageResponse = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(response.image_data_uint8, vec![9, 8, 7]);
        assert_eq!((response.width, response.height), (1, 1));
    }
}
