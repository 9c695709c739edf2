//! Peer address canonicalization and outbound dialing
use crate::error::NetworkError;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{lookup_host, TcpStream};

/// Rewrite `address` to `host:default_port`, dropping whatever port it had.
///
/// Peers are identified by host only; two addresses that differ just in the
/// stated port are the same peer. Bracketed IPv6 (`[::1]:7777`) keeps its
/// brackets, a bare IPv6 literal gets them. Returns `None` when no host is
/// left.
pub fn canonical_address(address: &str, default_port: u16) -> Option<String> {
    let address = address.trim();
    let host = if address.starts_with('[') {
        let end = address.find(']')?;
        address[..=end].to_string()
    } else if address.matches(':').count() > 1 {
        format!("[{}]", address)
    } else {
        match address.rfind(':') {
            Some(i) => address[..i].to_string(),
            None => address.to_string(),
        }
    };
    if host.is_empty() || host == "[]" {
        return None;
    }
    Some(format!("{}:{}", host, default_port))
}

/// Resolve `address` and connect to the first resolved socket that accepts.
///
/// Both the lookup and each connect attempt are bounded by `timeout`.
pub async fn dial(address: &str, timeout: Duration) -> Result<TcpStream, NetworkError> {
    let resolved: Vec<SocketAddr> = match tokio::time::timeout(timeout, lookup_host(address)).await
    {
        Ok(Ok(addrs)) => addrs.collect(),
        Ok(Err(e)) => {
            return Err(NetworkError::Resolve {
                address: address.to_string(),
                reason: e.to_string(),
            })
        }
        Err(_) => {
            return Err(NetworkError::Resolve {
                address: address.to_string(),
                reason: "lookup timed out".to_string(),
            })
        }
    };
    if resolved.is_empty() {
        return Err(NetworkError::Resolve {
            address: address.to_string(),
            reason: "no addresses".to_string(),
        });
    }

    let mut last_error = None;
    for addr in resolved {
        match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => return Ok(stream),
            Ok(Err(e)) => last_error = Some(e),
            Err(_) => last_error = Some(io::Error::new(io::ErrorKind::TimedOut, "connect timed out")),
        }
    }
    Err(NetworkError::Dial {
        address: address.to_string(),
        source: last_error
            .unwrap_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "no attempt made")),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn test_canonicalizes_with_and_without_port() {
        assert_eq!(
            canonical_address("1.2.3.4", 2016).as_deref(),
            Some("1.2.3.4:2016")
        );
        assert_eq!(
            canonical_address("1.2.3.4:9999", 2016).as_deref(),
            Some("1.2.3.4:2016")
        );
        assert_eq!(
            canonical_address("seed.example.org:1", 2016).as_deref(),
            Some("seed.example.org:2016")
        );
    }

    #[test]
    fn test_canonicalization_is_idempotent() {
        for raw in ["1.2.3.4", "1.2.3.4:9999", "[::1]:7777", "::1", " host:5 "] {
            let once = canonical_address(raw, 2016).unwrap();
            let twice = canonical_address(&once, 2016).unwrap();
            assert_eq!(once, twice, "input {:?}", raw);
        }
    }

    #[test]
    fn test_ipv6_keeps_brackets() {
        assert_eq!(
            canonical_address("[::1]:7777", 2016).as_deref(),
            Some("[::1]:2016")
        );
        assert_eq!(
            canonical_address("fe80::1", 2016).as_deref(),
            Some("[fe80::1]:2016")
        );
    }

    #[test]
    fn test_empty_host_is_rejected() {
        assert_eq!(canonical_address("", 2016), None);
        assert_eq!(canonical_address(":7777", 2016), None);
        assert_eq!(canonical_address("[]:7777", 2016), None);
    }

    #[tokio::test]
    async fn test_dial_reaches_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let stream = dial(&addr.to_string(), Duration::from_secs(2)).await.unwrap();
        assert_eq!(stream.peer_addr().unwrap(), addr);
    }

    #[tokio::test]
    async fn test_dial_refused_is_dial_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = dial(&addr.to_string(), Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(matches!(err, NetworkError::Dial { .. }));
    }

    #[tokio::test]
    async fn test_unparseable_address_is_resolve_error() {
        let err = dial("not an address", Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(matches!(err, NetworkError::Resolve { .. }));
    }
}
