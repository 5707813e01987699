use anyhow::{Context, Result, bail};
use log::{debug, error, warn};
use pnet::datalink::{self, Channel, Config, DataLinkSender};
use std::collections::HashMap;
use std::sync::Mutex;
use std::thread;
use tokio::sync::mpsc;

/// Sends raw Ethernet frames out a named interface.
pub trait Transport: Send + Sync {
    fn transmit(&self, frame: &[u8], interface: &str) -> bool;
}

/// A frame handed up by the link layer, tagged with the receiving interface.
#[derive(Debug, Clone)]
pub struct ReceivedFrame {
    pub interface: String,
    pub data: Vec<u8>,
}

/// Transport over raw pnet datalink channels, one per interface.
pub struct DatalinkTransport {
    senders: Mutex<HashMap<String, Box<dyn DataLinkSender>>>,
}

impl DatalinkTransport {
    /// Opens a channel on each named host interface. Inbound frames are
    /// delivered on the returned receiver by one reader thread per interface.
    pub fn open(names: &[String]) -> Result<(Self, mpsc::Receiver<ReceivedFrame>)> {
        let host_interfaces = datalink::interfaces();
        let (frame_tx, frame_rx) = mpsc::channel(1024);
        let mut senders = HashMap::new();

        for name in names {
            let host_iface = host_interfaces
                .iter()
                .find(|iface| &iface.name == name)
                .with_context(|| format!("interface {} not found on host", name))?;

            let (tx, mut rx) = match datalink::channel(
                host_iface,
                Config {
                    promiscuous: false,
                    ..Default::default()
                },
            )
                .with_context(|| format!("failed to open datalink channel on {}", name))?
            {
                Channel::Ethernet(tx, rx) => (tx, rx),
                _ => bail!("unsupported channel type on {}", name),
            };
            senders.insert(name.clone(), tx);

            let frame_tx = frame_tx.clone();
            let iface_name = name.clone();
            thread::Builder::new()
                .name(format!("rx-{}", name))
                .spawn(move || {
                    loop {
                        match rx.next() {
                            Ok(data) => {
                                let frame = ReceivedFrame {
                                    interface: iface_name.clone(),
                                    data: data.to_vec(),
                                };
                                if frame_tx.blocking_send(frame).is_err() {
                                    debug!("Receiver for {} closed, stopping reader", iface_name);
                                    break;
                                }
                            }
                            Err(e) => {
                                error!("Failed to read from {}: {}", iface_name, e);
                                break;
                            }
                        }
                    }
                })
                .with_context(|| format!("failed to spawn reader for {}", name))?;
        }

        Ok((
            Self {
                senders: Mutex::new(senders),
            },
            frame_rx,
        ))
    }
}

impl Transport for DatalinkTransport {
    fn transmit(&self, frame: &[u8], interface: &str) -> bool {
        let mut senders = match self.senders.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let Some(tx) = senders.get_mut(interface) else {
            warn!("No datalink sender for interface {}", interface);
            return false;
        };
        match tx.send_to(frame, None) {
            Some(Ok(())) => true,
            Some(Err(e)) => {
                warn!("Failed to send frame on {}: {}", interface, e);
                false
            }
            None => {
                warn!("Send buffer unavailable on {}", interface);
                false
            }
        }
    }
}
