//! Minimal DNS TXT lookups for challenge propagation checks.
//!
//! Before an authorization is flagged ready, the configured recursive
//! resolvers are polled for the `_acme-challenge` TXT record so the ACME
//! server's validator has a fair chance of seeing it.

use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::{timeout, Instant};
use tracing::debug;

const TYPE_TXT: u16 = 16;
const CLASS_IN: u16 = 1;

/// Poll `resolvers` until one of them returns a TXT record for `fqdn`
/// matching `value`, or the `budget` runs out. Returns whether the record
/// became visible; on `false` the caller proceeds and leaves the final
/// verdict to the ACME server.
pub async fn wait_for_txt(
    resolvers: &[String],
    fqdn: &str,
    value: &str,
    budget: Duration,
) -> bool {
    let deadline = Instant::now() + budget;
    loop {
        for resolver in resolvers {
            let Ok(server) = resolver_addr(resolver) else {
                debug!(resolver = %resolver, "skipping unparsable resolver address");
                continue;
            };
            match query_txt(server, fqdn, Duration::from_secs(5)).await {
                Ok(values) if values.iter().any(|v| v == value) => {
                    debug!(fqdn = %fqdn, resolver = %resolver, "TXT record visible");
                    return true;
                }
                Ok(_) => {}
                Err(e) => debug!(fqdn = %fqdn, resolver = %resolver, "TXT probe failed: {}", e),
            }
        }
        if Instant::now() + Duration::from_secs(5) > deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_secs(5)).await;
    }
}

/// Resolver addresses default to port 53 when none is given.
fn resolver_addr(resolver: &str) -> Result<SocketAddr, std::net::AddrParseError> {
    if resolver.contains(':') && resolver.parse::<std::net::Ipv6Addr>().is_err() {
        resolver.parse()
    } else {
        format!("{}:53", resolver).parse().or_else(|_| {
            // Bare IPv6 address
            format!("[{}]:53", resolver).parse()
        })
    }
}

/// Send one TXT query over UDP and return the TXT strings in the answer
/// section.
async fn query_txt(
    server: SocketAddr,
    fqdn: &str,
    dur: Duration,
) -> std::io::Result<Vec<String>> {
    let txid: u16 = rand::random();
    let query = build_txt_query(txid, fqdn);

    let bind_addr: SocketAddr = if server.is_ipv4() {
        "0.0.0.0:0".parse().unwrap()
    } else {
        "[::]:0".parse().unwrap()
    };
    let socket = UdpSocket::bind(bind_addr).await?;
    socket.send_to(&query, server).await?;

    let mut buf = vec![0u8; 4096];
    let (len, src) = timeout(dur, socket.recv_from(&mut buf))
        .await
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "DNS query timed out"))??;
    buf.truncate(len);

    if src.ip() != server.ip() {
        return Err(std::io::Error::other("response from unexpected source"));
    }
    if buf.len() < 12 || u16::from_be_bytes([buf[0], buf[1]]) != txid {
        return Err(std::io::Error::other("response txid mismatch"));
    }

    Ok(parse_txt_answers(&buf).unwrap_or_default())
}

/// Build a recursion-desired TXT query packet.
fn build_txt_query(txid: u16, fqdn: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(32 + fqdn.len());
    buf.extend_from_slice(&txid.to_be_bytes());
    buf.extend_from_slice(&0x0100u16.to_be_bytes()); // flags: RD
    buf.extend_from_slice(&1u16.to_be_bytes()); // qdcount
    buf.extend_from_slice(&0u16.to_be_bytes()); // ancount
    buf.extend_from_slice(&0u16.to_be_bytes()); // nscount
    buf.extend_from_slice(&0u16.to_be_bytes()); // arcount
    encode_name(fqdn, &mut buf);
    buf.extend_from_slice(&TYPE_TXT.to_be_bytes());
    buf.extend_from_slice(&CLASS_IN.to_be_bytes());
    buf
}

/// Encode a DNS name into wire format labels, clamped to 63 bytes each.
fn encode_name(name: &str, buf: &mut Vec<u8>) {
    for label in name.trim_end_matches('.').split('.') {
        let len = label.len().min(63);
        buf.push(len as u8);
        buf.extend_from_slice(&label.as_bytes()[..len]);
    }
    buf.push(0);
}

/// Walk the answer section and collect TXT strings. Returns None on any
/// malformed offset.
fn parse_txt_answers(buf: &[u8]) -> Option<Vec<String>> {
    let qdcount = u16::from_be_bytes([*buf.get(4)?, *buf.get(5)?]);
    let ancount = u16::from_be_bytes([*buf.get(6)?, *buf.get(7)?]);

    let mut pos = 12usize;
    for _ in 0..qdcount {
        pos = skip_name(buf, pos)?;
        pos += 4; // qtype + qclass
    }

    let mut values = Vec::new();
    for _ in 0..ancount {
        pos = skip_name(buf, pos)?;
        let rtype = u16::from_be_bytes([*buf.get(pos)?, *buf.get(pos + 1)?]);
        let rdlen = u16::from_be_bytes([*buf.get(pos + 8)?, *buf.get(pos + 9)?]) as usize;
        pos += 10;
        let rdata = buf.get(pos..pos + rdlen)?;
        if rtype == TYPE_TXT {
            // TXT rdata: sequence of length-prefixed strings
            let mut offset = 0usize;
            let mut text = String::new();
            while offset < rdata.len() {
                let len = rdata[offset] as usize;
                offset += 1;
                let chunk = rdata.get(offset..offset + len)?;
                text.push_str(&String::from_utf8_lossy(chunk));
                offset += len;
            }
            values.push(text);
        }
        pos += rdlen;
    }
    Some(values)
}

/// Skip over a possibly compressed name, returning the offset after it.
fn skip_name(buf: &[u8], mut pos: usize) -> Option<usize> {
    loop {
        let len = *buf.get(pos)?;
        if len & 0xC0 == 0xC0 {
            return Some(pos + 2); // compression pointer ends the name
        }
        if len == 0 {
            return Some(pos + 1);
        }
        pos += 1 + len as usize;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_txt_query_layout() {
        let query = build_txt_query(0xABCD, "_acme-challenge.example.com");
        assert_eq!(&query[..2], &[0xAB, 0xCD]);
        assert_eq!(&query[2..4], &[0x01, 0x00]);
        assert_eq!(&query[4..6], &[0x00, 0x01]);
        // First label length then label bytes
        assert_eq!(query[12] as usize, "_acme-challenge".len());
        // Trailing qtype/qclass
        let n = query.len();
        assert_eq!(&query[n - 4..], &[0x00, 0x10, 0x00, 0x01]);
    }

    #[test]
    fn test_parse_txt_answer_roundtrip() {
        // Hand-built response: header, echoed question, one TXT answer
        let mut buf = Vec::new();
        buf.extend_from_slice(&0x1234u16.to_be_bytes());
        buf.extend_from_slice(&0x8180u16.to_be_bytes());
        buf.extend_from_slice(&1u16.to_be_bytes()); // qdcount
        buf.extend_from_slice(&1u16.to_be_bytes()); // ancount
        buf.extend_from_slice(&0u16.to_be_bytes());
        buf.extend_from_slice(&0u16.to_be_bytes());
        encode_name("_acme-challenge.example.com", &mut buf);
        buf.extend_from_slice(&[0x00, 0x10, 0x00, 0x01]);
        // Answer with a compression pointer back to the question name
        buf.extend_from_slice(&[0xC0, 0x0C]);
        buf.extend_from_slice(&[0x00, 0x10, 0x00, 0x01]);
        buf.extend_from_slice(&60u32.to_be_bytes());
        let txt = b"token-value";
        buf.extend_from_slice(&((txt.len() + 1) as u16).to_be_bytes());
        buf.push(txt.len() as u8);
        buf.extend_from_slice(txt);

        let values = parse_txt_answers(&buf).unwrap();
        assert_eq!(values, vec!["token-value".to_string()]);
    }

    #[test]
    fn test_resolver_addr_defaults_port() {
        assert_eq!(
            resolver_addr("8.8.8.8").unwrap(),
            "8.8.8.8:53".parse().unwrap()
        );
        assert_eq!(
            resolver_addr("1.1.1.1:5353").unwrap(),
            "1.1.1.1:5353".parse().unwrap()
        );
        assert_eq!(
            resolver_addr("2001:4860:4860::8888").unwrap(),
            "[2001:4860:4860::8888]:53".parse().unwrap()
        );
    }

    #[test]
    fn test_truncated_answer_is_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&0x1234u16.to_be_bytes());
        buf.extend_from_slice(&0x8180u16.to_be_bytes());
        buf.extend_from_slice(&0u16.to_be_bytes());
        buf.extend_from_slice(&1u16.to_be_bytes()); // claims one answer
        buf.extend_from_slice(&0u16.to_be_bytes());
        buf.extend_from_slice(&0u16.to_be_bytes());
        // No answer bytes follow
        assert!(parse_txt_answers(&buf).is_none());
    }
}
