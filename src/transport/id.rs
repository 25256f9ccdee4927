use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{Error, Result};

/// The most pre-identification bytes tolerated before the `SSH-` line.
const MAX_PREAMBLE: usize = 16 * 1024;

/// The longest accepted identification or banner line, CR LF excluded.
const MAX_LINE: usize = 255;

/// Run the identification exchange from
/// [RFC 4253 § 4.2](https://datatracker.ietf.org/doc/html/rfc4253#section-4.2):
/// send our `SSH-2.0-` line and scan the peer's stream for its own,
/// tolerating banner lines in between.
///
/// Reads one byte at a time on purpose, so no packet byte past the
/// identification line is ever consumed.
pub(crate) async fn exchange<S>(stream: &mut S, software: &str) -> Result<(String, String)>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let ours = format!("SSH-2.0-{software}");

    stream.write_all(ours.as_bytes()).await?;
    stream.write_all(b"\r\n").await?;
    stream.flush().await?;

    let mut budget = MAX_PREAMBLE;
    loop {
        let line = line(stream, &mut budget).await?;

        if let Some(version) = line.strip_prefix("SSH-") {
            if !version.starts_with("2.0-") && !version.starts_with("1.99-") {
                return Err(Error::Protocol("peer speaks an unsupported protocol version"));
            }

            tracing::debug!("Identification exchange done, peer is `{line}`");

            return Ok((ours, line));
        }

        tracing::debug!("Pre-identification banner: {line}");
    }
}

/// Read a line terminated by CR LF; a bare LF ends the line too, but a CR
/// not followed by LF is an error.
async fn line<S>(stream: &mut S, budget: &mut usize) -> Result<String>
where
    S: AsyncRead + Unpin,
{
    let mut line = Vec::new();

    loop {
        if *budget == 0 {
            return Err(Error::Protocol("identification exchange overran its bound"));
        }
        *budget -= 1;

        match stream.read_u8().await? {
            b'\r' => {
                if stream.read_u8().await? != b'\n' {
                    return Err(Error::Protocol("carriage return not followed by line feed"));
                }

                break;
            }
            b'\n' => break,
            byte => {
                line.push(byte);

                if line.len() > MAX_LINE {
                    return Err(Error::Protocol("identification line too long"));
                }
            }
        }
    }

    String::from_utf8(line).map_err(|_| Error::Protocol("identification line is not valid utf-8"))
}
