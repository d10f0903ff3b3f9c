//! Semtech packet forwarder protocol over the UDP adapter.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::{convert, Datagram, Handler, UpstreamReply, UpstreamRequest, WriteHandle};
use crate::core::{Packet as _, RouterPacket};
use crate::error::{Error, Result};
use crate::lorawan::Eui64;
use crate::semtech::{Identifier, Packet, Rxpk};

#[derive(Debug, Clone)]
pub struct HandlerConfig {
    /// How long an uplink waits for its downlink before giving up silently
    pub downlink_wait: Duration,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            downlink_wait: Duration::from_secs(2),
        }
    }
}

/// Acknowledges gateway datagrams and forwards their uplinks.
#[derive(Debug, Clone, Default)]
pub struct SemtechHandler {
    config: HandlerConfig,
}

impl SemtechHandler {
    pub fn new(config: HandlerConfig) -> Self {
        Self { config }
    }

    async fn handle_push_data(
        &self,
        conn: WriteHandle,
        upstream: mpsc::Sender<UpstreamRequest>,
        addr: SocketAddr,
        packet: Packet,
    ) -> Result<()> {
        // Ack first, the gateway's own retransmission timer is short
        let ack = Packet::push_ack(packet.token).encode()?;
        conn.send_to(addr, ack).await?;

        let gateway_id = Eui64(packet.gateway_id.as_slice().try_into().map_err(|_| {
            Error::structural(format!(
                "gateway id must be 8 bytes, got {}",
                packet.gateway_id.len()
            ))
        })?);
        let payload = packet
            .payload
            .ok_or_else(|| Error::structural("PUSH_DATA without payload"))?;

        if let Some(stat) = payload.stat {
            debug!(gateway = %gateway_id, ?stat, "Gateway status");
        }

        info!(
            gateway = %gateway_id,
            addr = %addr,
            records = payload.rxpk.len(),
            "PUSH_DATA"
        );
        for rxpk in payload.rxpk {
            tokio::spawn(forward_rxpk(
                rxpk,
                gateway_id,
                conn.clone(),
                upstream.clone(),
                addr,
                self.config.downlink_wait,
            ));
        }
        Ok(())
    }
}

impl Handler for SemtechHandler {
    async fn handle(
        &self,
        conn: WriteHandle,
        upstream: mpsc::Sender<UpstreamRequest>,
        datagram: Datagram,
    ) -> Result<()> {
        let packet = Packet::decode(&datagram.data)?;

        match packet.identifier {
            Identifier::PullData => {
                debug!(
                    gateway = %hex::encode_upper(&packet.gateway_id),
                    addr = %datagram.addr,
                    "PULL_DATA"
                );
                let ack = Packet::pull_ack(packet.token).encode()?;
                conn.send_to(datagram.addr, ack).await
            }
            Identifier::PushData => {
                self.handle_push_data(conn, upstream, datagram.addr, packet)
                    .await
            }
            other => {
                debug!(addr = %datagram.addr, identifier = %other, "Ignoring datagram");
                Ok(())
            }
        }
    }
}

/// Per-record task: failures end here.
async fn forward_rxpk(
    rxpk: Rxpk,
    gateway_id: Eui64,
    conn: WriteHandle,
    upstream: mpsc::Sender<UpstreamRequest>,
    addr: SocketAddr,
    wait: Duration,
) {
    if let Err(e) = exchange(rxpk, gateway_id, conn, upstream, addr, wait).await {
        warn!(gateway = %gateway_id, addr = %addr, error = %e, "Dropped uplink record");
    }
}

async fn exchange(
    rxpk: Rxpk,
    gateway_id: Eui64,
    conn: WriteHandle,
    upstream: mpsc::Sender<UpstreamRequest>,
    addr: SocketAddr,
    wait: Duration,
) -> Result<()> {
    let packet = convert::rxpk_to_router_packet(&rxpk, gateway_id)?;
    debug!(packet = %packet, "Uplink");

    let (reply_tx, reply_rx) = oneshot::channel();
    let request = UpstreamRequest {
        packet: packet.marshal_binary()?,
        reply: reply_tx,
    };

    let submitted = async {
        upstream
            .send(request)
            .await
            .map_err(|_| Error::operational("upstream queue closed"))?;
        reply_rx
            .await
            .map_err(|_| Error::behavioral("upstream dropped the request unanswered"))
    };
    let reply = match timeout(wait, submitted).await {
        Ok(reply) => reply?,
        Err(_) => {
            debug!(gateway = %gateway_id, ?wait, "No downlink");
            return Ok(());
        }
    };

    match reply {
        UpstreamReply::Downlink(data) => {
            let downlink = RouterPacket::unmarshal_binary(&data)?;
            let txpk = convert::router_packet_to_txpk(&downlink)?;
            debug!(packet = %downlink, addr = %addr, "Downlink");
            conn.send_to(addr, Packet::pull_resp(txpk).encode()?).await
        }
        UpstreamReply::NoDownlink => Ok(()),
        UpstreamReply::Nack(reason) => {
            debug!(gateway = %gateway_id, reason = %reason, "Upstream rejected uplink");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Metadata;
    use crate::encoding::DataRate;
    use crate::lorawan::{AesKey, MType, PhyPayload};
    use crate::semtech::{Payload, Stat, VERSION};
    use crate::udp::{AdapterConfig, UdpAdapter};
    use base64::Engine;
    use tokio::net::UdpSocket;
    use tokio_test::assert_ok;

    const GATEWAY: [u8; 8] = [1, 2, 3, 4, 5, 6, 7, 8];
    const TOKEN: [u8; 2] = [0x14, 0x42];

    fn confirmed_uplink() -> PhyPayload {
        let mut phy = PhyPayload::new_data(MType::ConfirmedDataUp, 0x26011BDA, 12, 1, b"hi!".to_vec());
        phy.sign(&AesKey([0x2B; 16])).unwrap();
        phy
    }

    fn rxpk(phy: &PhyPayload) -> Rxpk {
        Rxpk {
            freq: Some(868.1),
            rssi: Some(-42),
            modu: Some("LORA".into()),
            datr: Some(DataRate::Lora("SF7BW125".into())),
            tmst: Some(1000),
            data: Some(
                base64::engine::general_purpose::STANDARD.encode(phy.to_bytes().unwrap()),
            ),
            ..Default::default()
        }
    }

    fn push_data(records: Vec<Rxpk>) -> Vec<u8> {
        Packet {
            version: VERSION,
            token: TOKEN.to_vec(),
            identifier: Identifier::PushData,
            gateway_id: GATEWAY.to_vec(),
            payload: Some(Payload {
                rxpk: records,
                ..Default::default()
            }),
        }
        .encode()
        .unwrap()
    }

    async fn start(
        wait: Duration,
    ) -> (
        UdpAdapter<SemtechHandler>,
        mpsc::Receiver<UpstreamRequest>,
        UdpSocket,
    ) {
        let config = AdapterConfig {
            bind: "127.0.0.1:0".to_string(),
            ..Default::default()
        };
        let handler = SemtechHandler::new(HandlerConfig {
            downlink_wait: wait,
        });
        let (adapter, upstream) = UdpAdapter::bind(config, handler).await.unwrap();
        let gateway = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        gateway.connect(adapter.local_addr()).await.unwrap();
        (adapter, upstream, gateway)
    }

    async fn recv(gateway: &UdpSocket, within: Duration) -> Option<Packet> {
        let mut buf = vec![0u8; 2048];
        match timeout(within, gateway.recv(&mut buf)).await {
            Ok(Ok(n)) => Some(Packet::decode(&buf[..n]).unwrap()),
            _ => None,
        }
    }

    #[tokio::test]
    async fn test_pull_data_acked() {
        let (_adapter, _upstream, gateway) = start(Duration::from_secs(2)).await;
        let pull = Packet {
            version: VERSION,
            token: vec![0xAB, 0xCD],
            identifier: Identifier::PullData,
            gateway_id: GATEWAY.to_vec(),
            payload: None,
        };
        gateway.send(&pull.encode().unwrap()).await.unwrap();

        let ack = recv(&gateway, Duration::from_secs(1)).await.unwrap();
        assert_eq!(ack.identifier, Identifier::PullAck);
        assert_eq!(ack.token, vec![0xAB, 0xCD]);
    }

    #[tokio::test]
    async fn test_malformed_datagram_gets_no_ack() {
        let (_adapter, _upstream, gateway) = start(Duration::from_secs(2)).await;
        gateway.send(&[0x02, 0x14, 0x42, 0x00]).await.unwrap();
        gateway.send(&[0x01, 0x14]).await.unwrap();
        assert!(recv(&gateway, Duration::from_millis(200)).await.is_none());
    }

    #[tokio::test]
    async fn test_end_to_end_uplink() {
        let (_adapter, mut upstream, gateway) = start(Duration::from_secs(2)).await;
        let phy = confirmed_uplink();
        gateway.send(&push_data(vec![rxpk(&phy)])).await.unwrap();

        let ack = recv(&gateway, Duration::from_secs(1)).await.unwrap();
        assert_eq!(ack.identifier, Identifier::PushAck);
        assert_eq!(ack.token, TOKEN.to_vec());

        let request = timeout(Duration::from_secs(1), upstream.recv())
            .await
            .unwrap()
            .unwrap();
        let packet = RouterPacket::unmarshal_binary(&request.packet).unwrap();
        assert_eq!(packet.gateway_id(), Eui64(GATEWAY));
        assert_eq!(packet.payload(), phy);
        assert_eq!(packet.metadata().rssi, Some(-42));
        assert_ok!(request.reply.send(UpstreamReply::NoDownlink));

        // Exactly one submission
        assert!(timeout(Duration::from_millis(200), upstream.recv())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_ack_before_forward() {
        let (_adapter, mut upstream, gateway) = start(Duration::from_secs(2)).await;
        let phy = confirmed_uplink();
        gateway
            .send(&push_data(vec![rxpk(&phy), rxpk(&phy)]))
            .await
            .unwrap();

        // Both records are held upstream; the ack is already on the wire
        let first = timeout(Duration::from_secs(1), upstream.recv()).await.unwrap().unwrap();
        let second = timeout(Duration::from_secs(1), upstream.recv()).await.unwrap().unwrap();

        let ack = recv(&gateway, Duration::from_millis(500)).await.unwrap();
        assert_eq!(ack.identifier, Identifier::PushAck);

        drop(first);
        drop(second);
    }

    #[tokio::test]
    async fn test_downlink_sent_to_gateway() {
        let (_adapter, mut upstream, gateway) = start(Duration::from_secs(2)).await;
        gateway
            .send(&push_data(vec![rxpk(&confirmed_uplink())]))
            .await
            .unwrap();
        let ack = recv(&gateway, Duration::from_secs(1)).await.unwrap();
        assert_eq!(ack.identifier, Identifier::PushAck);

        let request = upstream.recv().await.unwrap();
        let down = PhyPayload::new_data(MType::UnconfirmedDataDown, 0x26011BDA, 4, 1, vec![0x01]);
        let metadata = Metadata {
            freq: Some(869.525),
            powe: Some(14),
            modu: Some("LORA".into()),
            datr: Some(DataRate::Lora("SF9BW125".into())),
            imme: Some(true),
            ..Default::default()
        };
        let answer = RouterPacket::new(Eui64(GATEWAY), down.clone(), metadata).unwrap();
        request
            .reply
            .send(UpstreamReply::Downlink(answer.marshal_binary().unwrap()))
            .unwrap();

        let resp = recv(&gateway, Duration::from_secs(1)).await.unwrap();
        assert_eq!(resp.identifier, Identifier::PullResp);
        assert!(resp.token.is_empty());
        let txpk = resp.payload.unwrap().txpk.unwrap();
        assert_eq!(txpk.freq, Some(869.525));
        assert_eq!(txpk.imme, Some(true));
        let raw = base64::engine::general_purpose::STANDARD
            .decode(txpk.data.unwrap())
            .unwrap();
        assert_eq!(raw, down.to_bytes().unwrap());
    }

    #[tokio::test]
    async fn test_timeout_is_silent() {
        let (_adapter, mut upstream, gateway) = start(Duration::from_millis(100)).await;
        gateway
            .send(&push_data(vec![rxpk(&confirmed_uplink())]))
            .await
            .unwrap();
        assert!(recv(&gateway, Duration::from_secs(1)).await.is_some());

        // Upstream holds the request past the deadline, then answers
        let request = upstream.recv().await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        let down = PhyPayload::new_data(MType::UnconfirmedDataDown, 1, 1, 1, vec![1]);
        let late = RouterPacket::new(Eui64(GATEWAY), down, Metadata::default()).unwrap();
        let _ = request
            .reply
            .send(UpstreamReply::Downlink(late.marshal_binary().unwrap()));

        assert!(recv(&gateway, Duration::from_millis(300)).await.is_none());

        // The adapter keeps serving
        gateway
            .send(&push_data(vec![rxpk(&confirmed_uplink())]))
            .await
            .unwrap();
        assert!(recv(&gateway, Duration::from_secs(1)).await.is_some());
    }

    #[tokio::test]
    async fn test_bad_record_does_not_affect_siblings() {
        let (_adapter, mut upstream, gateway) = start(Duration::from_secs(2)).await;
        let broken = Rxpk {
            data: Some("????".into()),
            ..Default::default()
        };
        gateway
            .send(&push_data(vec![broken, rxpk(&confirmed_uplink())]))
            .await
            .unwrap();
        assert!(recv(&gateway, Duration::from_secs(1)).await.is_some());

        let request = timeout(Duration::from_secs(1), upstream.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(RouterPacket::unmarshal_binary(&request.packet).is_ok());
        assert!(timeout(Duration::from_millis(200), upstream.recv())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_stat_only_push_data() {
        let (_adapter, upstream, gateway) = start(Duration::from_secs(2)).await;
        let packet = Packet {
            version: VERSION,
            token: TOKEN.to_vec(),
            identifier: Identifier::PushData,
            gateway_id: GATEWAY.to_vec(),
            payload: Some(Payload {
                stat: Some(Stat {
                    rxnb: Some(3),
                    ..Default::default()
                }),
                ..Default::default()
            }),
        };
        gateway.send(&packet.encode().unwrap()).await.unwrap();

        let ack = recv(&gateway, Duration::from_secs(1)).await.unwrap();
        assert_eq!(ack.identifier, Identifier::PushAck);
        assert!(upstream.is_empty());
    }
}
