use std::io::ErrorKind;
use std::net::UdpSocket;
use std::os::fd::AsRawFd;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use eventmux::Reactor;
use tracing::{error, info};

/// Read every pending datagram, leaving the descriptor non-ready again.
fn drain_socket(socket: &UdpSocket) {
    let mut buf = [0u8; 64 * 1024];
    loop {
        match socket.recv_from(&mut buf) {
            Ok((len, from)) => info!(%from, len, "datagram received"),
            Err(err) if err.kind() == ErrorKind::WouldBlock => break,
            Err(err) => {
                error!(%err, "recv failed");
                break;
            }
        }
    }
}

/// A small daemon: two UDP receive sockets and two timers multiplexed on
/// one reactor, exercised by a sender loop.
fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt::init();

    let reactor = Reactor::new()?;

    let first = Arc::new(UdpSocket::bind("127.0.0.1:0")?);
    first.set_nonblocking(true)?;
    let second = Arc::new(UdpSocket::bind("127.0.0.1:0")?);
    second.set_nonblocking(true)?;
    let targets = [first.local_addr()?, second.local_addr()?];

    let socket = Arc::clone(&first);
    reactor.add_fd(first.as_raw_fd(), move || drain_socket(&socket));
    let socket = Arc::clone(&second);
    reactor.add_fd(second.as_raw_fd(), move || drain_socket(&socket));

    let _routine = reactor.add_timer(Duration::from_millis(1000), true, || {
        info!("routine timer fired");
    });
    let _one_off = reactor.add_timer(Duration::from_millis(3000), false, || {
        info!("one-off timer fired");
    });

    reactor.start()?;
    info!(?targets, "daemon started");

    let sender = UdpSocket::bind("127.0.0.1:0")?;
    for round in 0..8u32 {
        let target = targets[(round % 2) as usize];
        sender.send_to(format!("ping {round}").as_bytes(), target)?;
        thread::sleep(Duration::from_millis(500));
    }

    reactor.stop();
    Ok(())
}
