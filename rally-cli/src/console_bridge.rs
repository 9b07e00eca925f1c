use async_trait::async_trait;
use colored::*;
use rally_core::{GameMessage, HostRole};
use rally_session::{GameBridge, SessionDescriptor, SessionMode};
use serde_json::{Map, json};
use std::sync::Mutex;
use std::time::Instant;
use tracing::debug;

/// Stand-in for the game: prints what arrives and streams a heartbeat of
/// its own seat's messages.
pub struct ConsoleBridge {
    track_def: String,
    host_role: HostRole,
    seat: Mutex<Option<HostRole>>,
    started: Instant,
    verbose: bool,
}

impl ConsoleBridge {
    pub fn new(track_def: String, host_role: HostRole, verbose: bool) -> Self {
        Self {
            track_def,
            host_role,
            seat: Mutex::new(None),
            started: Instant::now(),
            verbose,
        }
    }

    fn seat(&self) -> Option<HostRole> {
        *self.seat.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn take_seat(&self, role: HostRole) {
        *self.seat.lock().unwrap_or_else(|e| e.into_inner()) = Some(role);
    }
}

#[async_trait]
impl GameBridge for ConsoleBridge {
    async fn session_descriptor(&self) -> SessionDescriptor {
        SessionDescriptor {
            track_def: self.track_def.clone(),
            host_role: self.host_role,
        }
    }

    async fn on_channel_open(&self, mode: SessionMode) {
        if mode == SessionMode::Host {
            self.take_seat(self.host_role);
        }
        println!("{}", "🔗 Data channel open".green().bold());
    }

    async fn on_message(&self, _mode: SessionMode, message: GameMessage) {
        match &message {
            GameMessage::Init { host_role, .. } => {
                let seat = host_role.guest();
                debug!("Taking the {:?} seat", seat);
                self.take_seat(seat);
                println!(
                    "{} host drives as {:?}, you are {:?}",
                    "🏁 Init:".cyan().bold(),
                    host_role,
                    seat
                );
            }
            GameMessage::Ready => println!("{}", "✅ Guest is ready".green()),
            GameMessage::Track { .. } => println!("{}", "🗺  Track changed".cyan()),
            other if self.verbose => println!("   ← {}", other.kind().dimmed()),
            _ => {}
        }
    }

    async fn outbound_tick(&self, mode: SessionMode) -> Option<GameMessage> {
        let t = self.started.elapsed().as_secs_f64();
        match (mode, self.seat()?) {
            (SessionMode::Host, _) => {
                let mut car = Map::new();
                car.insert("x".into(), json!(t.sin() * 100.0));
                car.insert("y".into(), json!(t.cos() * 100.0));
                Some(GameMessage::State {
                    t,
                    car,
                    extra: Map::new(),
                })
            }
            (_, HostRole::Driver) => Some(GameMessage::Driver {
                input: Map::from_iter([("throttle".to_owned(), json!(1.0))]),
                bullet_time_held: None,
            }),
            (_, HostRole::Navigator) => Some(GameMessage::Nav {
                aim_x: t.cos(),
                aim_y: t.sin(),
                shoot_held: false,
                weapon_index: 0,
                bullet_time_held: None,
                damage_events: None,
                projectiles: None,
            }),
        }
    }

    async fn on_peer_lost(&self) {
        *self.seat.lock().unwrap_or_else(|e| e.into_inner()) = None;
        println!("{}", "⚠️  Lost the other player".yellow());
    }
}
