//! IP local de saída, enviado no campo `status` do ThingSpeak.
//!
//! "Conecta" um socket UDP ao destino de sondagem e lê o endereço local
//! escolhido pela tabela de rotas. Nenhum pacote é enviado.

use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use co2_core::upload::{AddressResolver, DeliveryError};
use tokio::net::UdpSocket;
use tracing::debug;

pub struct OutboundAddress {
    target: String,
    timeout: Duration,
}

impl OutboundAddress {
    pub fn new(target: &str, timeout: Duration) -> Self {
        Self {
            target: target.to_string(),
            timeout,
        }
    }

    async fn local_ip(&self) -> std::io::Result<IpAddr> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect(self.target.as_str()).await?;
        Ok(socket.local_addr()?.ip())
    }
}

#[async_trait]
impl AddressResolver for OutboundAddress {
    async fn resolve(&self) -> Result<IpAddr, DeliveryError> {
        match tokio::time::timeout(self.timeout, self.local_ip()).await {
            Ok(Ok(ip)) if !ip.is_unspecified() => Ok(ip),
            Ok(Ok(ip)) => {
                debug!("Sem rota para {} (endereço local {ip})", self.target);
                Err(DeliveryError::NoRoute)
            }
            Ok(Err(e)) => {
                debug!("Sem rota para {}: {e}", self.target);
                Err(DeliveryError::NoRoute)
            }
            Err(_) => {
                debug!("Timeout ao resolver rota para {}", self.target);
                Err(DeliveryError::NoRoute)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn loopback_target_resolves_to_loopback() {
        let resolver = OutboundAddress::new("127.0.0.1:9", Duration::from_secs(1));
        let ip = resolver.resolve().await.unwrap();
        assert!(ip.is_loopback(), "{ip}");
    }

    #[tokio::test]
    async fn invalid_target_is_no_route() {
        let resolver = OutboundAddress::new("not an address", Duration::from_secs(1));
        assert!(matches!(resolver.resolve().await, Err(DeliveryError::NoRoute)));
    }
}
