use std::fmt;
use std::time::Duration;

use tracing::info;

use super::channel::{Marker, SessionChannel, TransportError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Middle,
    Server,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::Client, Role::Middle, Role::Server];

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Client => "client",
            Role::Middle => "middle",
            Role::Server => "server",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The three consoles of the test topology, owned for the whole run.
pub struct SessionPool {
    client: SessionChannel,
    middle: SessionChannel,
    server: SessionChannel,
}

impl SessionPool {
    pub fn new(client: SessionChannel, middle: SessionChannel, server: SessionChannel) -> Self {
        Self {
            client,
            middle,
            server,
        }
    }

    pub fn get_mut(&mut self, role: Role) -> &mut SessionChannel {
        match role {
            Role::Client => &mut self.client,
            Role::Middle => &mut self.middle,
            Role::Server => &mut self.server,
        }
    }

    pub fn client(&mut self) -> &mut SessionChannel {
        &mut self.client
    }

    pub fn middle(&mut self) -> &mut SessionChannel {
        &mut self.middle
    }

    /// Wait for every console's loading banner and first prompt, in turn.
    pub fn bring_up(
        &mut self,
        ready: &Marker,
        prompt: &Marker,
        timeout: Duration,
    ) -> Result<(), TransportError> {
        for role in Role::ALL {
            let ch = self.get_mut(role);
            info!(%role, console = ch.name(), "waiting for console");
            ch.await_ready(ready, prompt, timeout)?;
        }
        Ok(())
    }
}
