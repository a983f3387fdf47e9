use crate::prelude::*;
use crate::error::Error;

use {
    async_trait::async_trait,
    futures::StreamExt,
    net2::TcpStreamExt,
    std::time::Duration,
    tokio::io::AsyncWriteExt,
    tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf},
    tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError},
};

const DEFAULT_PORT: u16 = 5000;
const MAX_LINE_LENGTH: usize = 4096;
const TCP_KEEPALIVE_SECS: u64 = 60;

/// Ordered request/response line channel to one instrument.
///
/// Implementations do no correlation of their own; callers rely on replies
/// arriving in the order the queries were written.
#[async_trait]
pub trait Transport: Send {
    async fn send(&mut self, bytes: &[u8]) -> Result<(), Error>;

    /// Next reply line without its terminator.
    async fn receive_line(&mut self, timeout: Duration) -> Result<String, Error>;

    async fn close(&mut self) -> Result<(), Error>;

    /// Drop the current connection, with anything still unread, and dial again.
    async fn reconnect(&mut self) -> Result<(), Error>;
}

// Address {{{
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Address {
    pub host: String,
    pub port: u16,
}

impl std::str::FromStr for Address {
    type Err = anyhow::Error;

    /// Accepts `tcp://host[:port]`, port defaults to 5000.
    fn from_str(s: &str) -> Result<Self> {
        let url = url::Url::parse(s).map_err(|err| anyhow!("invalid address {:?}: {}", s, err))?;

        if url.scheme() != "tcp" {
            bail!("address {:?} not supported, expected tcp://host:port", s);
        }

        let host = match url.host_str() {
            Some(host) if !host.is_empty() => host.to_string(),
            _ => bail!("address {:?} has no host", s),
        };

        Ok(Self {
            host,
            port: url.port().unwrap_or(DEFAULT_PORT),
        })
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "tcp://{}:{}", self.host, self.port)
    }
} // }}}

// TcpTransport {{{
pub struct TcpTransport {
    address: Address,
    connection_timeout: Duration,
    reader: Option<FramedRead<OwnedReadHalf, LinesCodec>>,
    writer: Option<OwnedWriteHalf>,
}

impl TcpTransport {
    pub async fn connect(address: Address, connection_timeout: Duration) -> Result<Self, Error> {
        let mut transport = Self {
            address,
            connection_timeout,
            reader: None,
            writer: None,
        };
        transport.dial().await?;
        Ok(transport)
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    async fn dial(&mut self) -> Result<(), Error> {
        info!("connecting to {}", self.address);

        let hp = (self.address.host.clone(), self.address.port);
        let stream = match tokio::time::timeout(
            self.connection_timeout,
            tokio::net::TcpStream::connect(hp),
        )
        .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(Error::Connection(format!(
                    "failed to connect to {}: {}",
                    self.address, e
                )))
            }
            Err(_) => return Err(Error::Timeout(self.connection_timeout)),
        };

        let std_stream = stream.into_std()?;
        if let Err(e) = std_stream.set_keepalive(Some(Duration::from_secs(TCP_KEEPALIVE_SECS))) {
            warn!("failed to set TCP keepalive: {}", e);
        }
        let stream = tokio::net::TcpStream::from_std(std_stream)?;

        // queries are tiny and latency bound
        if let Err(e) = stream.set_nodelay(true) {
            warn!("failed to set TCP_NODELAY: {}", e);
        }

        let (reader, writer) = stream.into_split();
        self.reader = Some(FramedRead::new(
            reader,
            LinesCodec::new_with_max_length(MAX_LINE_LENGTH),
        ));
        self.writer = Some(writer);

        info!("connected to {}", self.address);
        Ok(())
    }

    fn not_connected(&self) -> Error {
        Error::Connection(format!("not connected to {}", self.address))
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn send(&mut self, bytes: &[u8]) -> Result<(), Error> {
        let writer = match self.writer.as_mut() {
            Some(writer) => writer,
            None => return Err(self.not_connected()),
        };

        writer.write_all(bytes).await?;
        writer.flush().await?;
        Ok(())
    }

    async fn receive_line(&mut self, timeout: Duration) -> Result<String, Error> {
        let address = self.address.clone();
        let reader = match self.reader.as_mut() {
            Some(reader) => reader,
            None => return Err(self.not_connected()),
        };

        match tokio::time::timeout(timeout, reader.next()).await {
            Ok(Some(Ok(line))) => Ok(line),
            Ok(Some(Err(LinesCodecError::Io(e)))) => Err(e.into()),
            Ok(Some(Err(LinesCodecError::MaxLineLengthExceeded))) => Err(Error::Connection(
                format!("reply from {} exceeds {} bytes", address, MAX_LINE_LENGTH),
            )),
            Ok(None) => Err(Error::Connection(format!(
                "connection closed by {}",
                address
            ))),
            Err(_) => Err(Error::Timeout(timeout)),
        }
    }

    async fn close(&mut self) -> Result<(), Error> {
        self.reader = None;
        if let Some(mut writer) = self.writer.take() {
            writer.shutdown().await?;
        }
        Ok(())
    }

    async fn reconnect(&mut self) -> Result<(), Error> {
        if let Err(e) = self.close().await {
            debug!("ignoring error closing {}: {}", self.address, e);
        }
        self.dial().await
    }
} // }}}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_addresses() {
        assert_eq!(
            "tcp://192.168.1.5:5001".parse::<Address>().unwrap(),
            Address {
                host: "192.168.1.5".to_string(),
                port: 5001
            }
        );
        assert_eq!(
            "tcp://cryocon.lab".parse::<Address>().unwrap().port,
            DEFAULT_PORT
        );
        assert!("serial:///dev/ttyS0".parse::<Address>().is_err());
        assert!("cryocon.lab:5000".parse::<Address>().is_err());
    }

    #[tokio::test]
    async fn exchanges_lines_over_tcp() -> Result<()> {
        use tokio::io::{AsyncBufReadExt, BufReader};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();

        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await?;
            let (reader, mut writer) = socket.into_split();
            let mut lines = BufReader::new(reader).lines();
            while let Some(line) = lines.next_line().await? {
                let reply = if line == "*IDN?" { "Cryo-con,24C,1234,1.0" } else { "NAK" };
                writer.write_all(format!("{}\r\n", reply).as_bytes()).await?;
            }
            Ok::<(), anyhow::Error>(())
        });

        let address = Address {
            host: "127.0.0.1".to_string(),
            port,
        };
        let mut transport = TcpTransport::connect(address, Duration::from_secs(1)).await?;
        transport.send(b"*IDN?\nBOGUS?\n").await?;

        let timeout = Duration::from_secs(1);
        assert_eq!(transport.receive_line(timeout).await?, "Cryo-con,24C,1234,1.0");
        assert_eq!(transport.receive_line(timeout).await?, "NAK");

        transport.close().await?;
        server.await??;
        Ok(())
    }
}
