use anyhow::{bail, Context, Result};
use common::{protocol::EXIT_COMMAND, SentinelScanner, MAX_COMMAND_LEN};
use std::io::Write;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};

/// Sesión TCP contra el servidor.
pub struct RemoteSession {
    stream: TcpStream,
    scanner: SentinelScanner,
    /// El servidor responde en modo directo: un trozo y sin sentinel.
    direct: bool,
}

impl RemoteSession {
    pub async fn connect(addr: &str, direct: bool) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .with_context(|| format!("no se pudo conectar a {addr}"))?;

        Ok(Self {
            stream,
            scanner: SentinelScanner::new(),
            direct,
        })
    }

    /// Manda un comando y copia la respuesta a `out` hasta que termine.
    pub async fn execute<W: Write>(&mut self, line: &str, out: &mut W) -> Result<()> {
        self.stream
            .write_all(format!("{line}\n").as_bytes())
            .await
            .context("error enviando el comando")?;

        let mut buf = vec![0u8; MAX_COMMAND_LEN];
        loop {
            let n = self
                .stream
                .read(&mut buf)
                .await
                .context("error leyendo la respuesta")?;
            if n == 0 {
                bail!("el servidor cerró la conexión");
            }

            if self.direct {
                out.write_all(&buf[..n])?;
                out.flush()?;
                return Ok(());
            }

            let scanned = self.scanner.feed(&buf[..n]);
            out.write_all(&scanned.output)?;
            out.flush()?;
            if scanned.done {
                return Ok(());
            }
        }
    }

    pub async fn close(mut self) -> Result<()> {
        self.stream
            .write_all(format!("{EXIT_COMMAND}\n").as_bytes())
            .await?;
        self.stream.shutdown().await?;
        Ok(())
    }
}
