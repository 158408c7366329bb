use std::io;

use mockall::mock;

use crate::{
    forwarder::{Connection, TransportError},
    telemetry::{Observer, Severity},
};

mock! {
    pub Connection {}

    impl Connection for Connection {
        fn connect(&mut self) -> Result<(), TransportError>;
        fn send(&mut self, payload: &[u8]) -> io::Result<()>;
        fn close(&mut self) -> io::Result<()>;
        fn transport_id(&self) -> &'static str;
    }
}

mock! {
    pub Observer {}

    impl Observer for Observer {
        fn packet_sent(&mut self, bytes: usize, lines: usize);
        fn packet_dropped(&mut self, severity: Severity, failures: u32, bytes: usize, lines: usize, error: &io::Error);
    }
}
