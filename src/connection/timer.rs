//! Drives [`crate::connection::conn::Connection`] on a single combined
//! timer instead of a timer wheel per deadline kind (idle, loss, PTO):
//! `Connection::next_timeout` already folds every deadline down to one
//! instant, so this just sleeps until it and fires `on_timeout`.

use std::time::Instant;

use tokio::time::{sleep_until, Instant as TokioInstant};

use crate::connection::conn::Connection;
use crate::result::QuicheResult;

/// Sleeps until the connection's next deadline and runs the matching
/// timeout handler. Returns `Ok(false)` once the connection is closed and
/// there's nothing left to wait for.
pub async fn drive_one_tick(conn: &mut Connection, now: Instant) -> QuicheResult<bool> {
    let Some(deadline) = conn.next_timeout() else {
        return Ok(false);
    };
    if deadline > now {
        sleep_until(TokioInstant::from_std(deadline)).await;
    }
    conn.on_timeout(Instant::now())?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EndpointConfig, TransportConfig};
    use crate::packet::types::ConnectionId;
    use crate::side::Side;
    use std::net::SocketAddr;

    #[tokio::test]
    async fn a_fresh_connection_with_no_idle_timeout_configured_has_no_deadline() {
        let addr_a: SocketAddr = "127.0.0.1:54001".parse().unwrap();
        let addr_b: SocketAddr = "127.0.0.1:54002".parse().unwrap();
        let mut transport = TransportConfig::default();
        transport.max_idle_timeout(None);
        let config = EndpointConfig::new(transport, ConnectionId::new(vec![1, 2, 3, 4]));
        let mut conn = Connection::new(
            Side::Client,
            addr_a,
            addr_b,
            config,
            ConnectionId::new(vec![1, 2, 3, 4]),
            ConnectionId::new(vec![4, 3, 2, 1]),
            Instant::now(),
        )
        .await
        .unwrap();
        assert!(conn.next_timeout().is_none());
        assert!(!drive_one_tick(&mut conn, Instant::now()).await.unwrap());
    }
}
