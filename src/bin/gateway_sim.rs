//! Gateway Simulator
//!
//! Simulates a LoRa gateway sending Semtech UDP Packet Forwarder
//! frames to the bridge. Useful for testing without hardware.
//!
//! Usage: cargo run --bin gateway-sim [server_addr]

use base64::Engine;
use chrono::Utc;
use std::env;
use std::net::SocketAddr;
use tokio::net::UdpSocket;
use tokio::time::{sleep, timeout, Duration};

use lora_gateway_bridge::encoding::{DataRate, MODULATION_FSK, MODULATION_LORA};
use lora_gateway_bridge::lorawan::{AesKey, Eui64, MType, PhyPayload};
use lora_gateway_bridge::semtech::{Identifier, Packet, Payload, Rxpk, Stat, VERSION};

/// Fake gateway EUI
const GATEWAY_EUI: [u8; 8] = [0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF, 0x00, 0x11];

/// Session key shared with the simulated devices
const NWK_S_KEY: AesKey = AesKey([0x2B; 16]);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let server_addr: SocketAddr = env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:1700".to_string())
        .parse()?;

    println!("🌊 Gateway Simulator");
    println!("  Target: {}", server_addr);
    println!("  Gateway EUI: {}", hex::encode(GATEWAY_EUI));
    println!();

    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    let mut token: u16 = 0;

    token = token.wrapping_add(1);
    println!("📡 Sending: PULL_DATA keepalive");
    let pull = Packet {
        version: VERSION,
        token: token.to_be_bytes().to_vec(),
        identifier: Identifier::PullData,
        gateway_id: GATEWAY_EUI.to_vec(),
        payload: None,
    };
    exchange(&socket, server_addr, &pull).await?;

    let scenarios = vec![
        ("Unconfirmed Data Up (temperature sensor)", temperature_sensor()?),
        ("Confirmed Data Up (door sensor)", door_sensor()?),
        ("FSK Data Up (meter)", fsk_meter()?),
        ("Join Request", join_request()?),
        ("Gateway Status", gateway_status()),
    ];

    for (desc, payload) in scenarios {
        token = token.wrapping_add(1);
        let packet = Packet {
            version: VERSION,
            token: token.to_be_bytes().to_vec(),
            identifier: Identifier::PushData,
            gateway_id: GATEWAY_EUI.to_vec(),
            payload: Some(payload),
        };

        println!("📡 Sending: {}", desc);
        exchange(&socket, server_addr, &packet).await?;
        sleep(Duration::from_secs(2)).await;
    }

    println!("✨ Simulation complete!");
    Ok(())
}

/// Send one datagram and report what comes back.
async fn exchange(socket: &UdpSocket, server: SocketAddr, packet: &Packet) -> anyhow::Result<()> {
    let data = packet.encode()?;
    println!("   Size: {} bytes", data.len());
    socket.send_to(&data, server).await?;

    let mut buf = [0u8; 2048];
    match timeout(Duration::from_secs(2), socket.recv_from(&mut buf)).await {
        Ok(Ok((len, from))) => match Packet::decode(&buf[..len]) {
            Ok(reply) if reply.token == packet.token => {
                println!("   ✅ {} received from {}", reply.identifier, from)
            }
            Ok(reply) => println!(
                "   ⚠️  {} with unexpected token {} from {}",
                reply.identifier,
                hex::encode(&reply.token),
                from
            ),
            Err(e) => println!("   ⚠️  Undecodable response ({} bytes): {}", len, e),
        },
        Ok(Err(e)) => println!("   ❌ Recv error: {}", e),
        Err(_) => println!("   ⏰ No ACK (timeout)"),
    }
    println!();
    Ok(())
}

fn uplink(phy: &PhyPayload, freq: f64, rssi: i32, lsnr: f64, datr: &str) -> anyhow::Result<Rxpk> {
    radio(phy, freq, rssi, lsnr, MODULATION_LORA, datr)
}

fn radio(
    phy: &PhyPayload,
    freq: f64,
    rssi: i32,
    lsnr: f64,
    modu: &str,
    datr: &str,
) -> anyhow::Result<Rxpk> {
    let raw = phy.to_bytes()?;
    Ok(Rxpk {
        time: Some(Utc::now()),
        tmst: Some(3_512_348_611),
        chan: Some(0),
        rfch: Some(0),
        freq: Some(freq),
        stat: Some(1),
        modu: Some(modu.to_string()),
        datr: Some(DataRate::for_modulation(Some(modu), datr)?),
        codr: Some("4/5".to_string()),
        rssi: Some(rssi),
        lsnr: Some(lsnr),
        size: Some(raw.len() as u32),
        data: Some(base64::engine::general_purpose::STANDARD.encode(&raw)),
    })
}

fn records(rxpk: Vec<Rxpk>) -> Payload {
    Payload {
        rxpk,
        ..Default::default()
    }
}

/// Unconfirmed Data Up, DevAddr 260B1234, FPort 1, 22.5°C in 0.1°C units
fn temperature_sensor() -> anyhow::Result<Payload> {
    let mut phy = PhyPayload::new_data(MType::UnconfirmedDataUp, 0x260B1234, 0x42, 1, vec![0x00, 0xE1]);
    phy.sign(&NWK_S_KEY)?;
    Ok(records(vec![uplink(&phy, 868.1, -65, 7.5, "SF7BW125")?]))
}

/// Confirmed Data Up, DevAddr 260B5678, FPort 2, door open, heard twice
fn door_sensor() -> anyhow::Result<Payload> {
    let mut phy = PhyPayload::new_data(MType::ConfirmedDataUp, 0x260B5678, 7, 2, vec![0x01]);
    phy.sign(&NWK_S_KEY)?;
    Ok(records(vec![
        uplink(&phy, 868.3, -112, -5.0, "SF10BW125")?,
        uplink(&phy, 868.3, -118, -9.25, "SF10BW125")?,
    ]))
}

/// FSK uplink: the data rate travels as a bare number
fn fsk_meter() -> anyhow::Result<Payload> {
    let mut phy = PhyPayload::new_data(MType::UnconfirmedDataUp, 0x260B9ABC, 1, 3, vec![0x10, 0x27]);
    phy.sign(&NWK_S_KEY)?;
    let mut rxpk = radio(&phy, 868.8, -80, 0.0, MODULATION_FSK, "50000")?;
    rxpk.codr = None;
    rxpk.lsnr = None;
    Ok(records(vec![rxpk]))
}

/// Join requests are acked but not forwarded by the router tier
fn join_request() -> anyhow::Result<Payload> {
    let mut phy = PhyPayload::new_join_request(
        Eui64([0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08]),
        Eui64([0xA1, 0xA2, 0xA3, 0xA4, 0xA5, 0xA6, 0xA7, 0xA8]),
        [0x42, 0x00],
    );
    phy.sign(&AesKey([0x01; 16]))?;
    Ok(records(vec![uplink(&phy, 868.5, -90, 2.0, "SF8BW125")?]))
}

/// Gateway status (no rxpk)
fn gateway_status() -> Payload {
    Payload {
        stat: Some(Stat {
            time: Some(Utc::now()),
            lati: Some(29.7604),
            long: Some(-95.3698),
            alti: Some(15),
            rxnb: Some(47),
            rxok: Some(44),
            rxfw: Some(44),
            ackr: Some(100.0),
            dwnb: Some(3),
            txnb: Some(3),
        }),
        ..Default::default()
    }
}
