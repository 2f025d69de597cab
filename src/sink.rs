use std::{
    io,
    net::{SocketAddr, ToSocketAddrs, UdpSocket},
};

/// Fire-and-forget output for encoded messages.
pub trait DatagramSink {
    fn send(&mut self, bytes: &[u8]) -> io::Result<usize>;
}

/// Non-blocking udp socket connected to one destination.
pub struct UdpSink {
    socket: UdpSocket,
    destination: SocketAddr,
}

impl UdpSink {
    pub fn connect<A: ToSocketAddrs>(bind: A, destination: SocketAddr) -> io::Result<Self> {
        let socket = UdpSocket::bind(bind)?;
        socket.connect(destination)?;
        socket.set_nonblocking(true)?;

        Ok(Self {
            socket,
            destination,
        })
    }

    pub fn destination(&self) -> SocketAddr {
        self.destination
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

impl DatagramSink for UdpSink {
    fn send(&mut self, bytes: &[u8]) -> io::Result<usize> {
        self.socket.send(bytes)
    }
}

impl<S: DatagramSink + ?Sized> DatagramSink for &mut S {
    fn send(&mut self, bytes: &[u8]) -> io::Result<usize> {
        (**self).send(bytes)
    }
}
