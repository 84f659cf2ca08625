//! Sensor de CO2 MT8057 via libusb (`rusb`).
//!
//! O kernel costuma prender o dispositivo no driver HID; ele é desanexado na
//! abertura e reanexado no `release`.

use std::time::Duration;

use co2_core::protocol::{FRAME_LEN, MAGIC, RawFrame};
use co2_core::sensor::{DeviceError, GasDevice, Release};
use rusb::{DeviceHandle, Direction, GlobalContext, Recipient, RequestType, TransferType};
use tracing::{debug, info, warn};

pub const VID: u16 = 0x04d9;
pub const PID: u16 = 0xa052;

const INTERFACE: u8 = 0;
const HID_SET_REPORT: u8 = 0x09;
const HID_REPORT_TYPE_FEATURE: u16 = 0x0300;
const CONTROL_TIMEOUT: Duration = Duration::from_secs(1);

/// MT8057 aberto e com a interface 0 reivindicada.
pub struct Mt8057 {
    handle: DeviceHandle<GlobalContext>,
    endpoint: u8,
    read_timeout: Duration,
    had_kernel_driver: bool,
}

impl Mt8057 {
    /// Localiza e prepara o dispositivo. `read_timeout` zero = sem limite.
    pub fn open(read_timeout: Duration) -> Result<Self, DeviceError> {
        let mut handle = rusb::open_device_with_vid_pid(VID, PID)
            .ok_or_else(|| DeviceError::NotFound(format!("MT8057 ({VID:04x}:{PID:04x})")))?;

        let had_kernel_driver = match handle.kernel_driver_active(INTERFACE) {
            Ok(true) => {
                handle
                    .detach_kernel_driver(INTERFACE)
                    .map_err(|e| DeviceError::Setup(format!("detach do driver: {e}")))?;
                debug!("Driver do kernel desanexado da interface {INTERFACE}");
                true
            }
            Ok(false) => false,
            Err(e) => {
                debug!("kernel_driver_active indisponível: {e}");
                false
            }
        };

        let endpoint = match Self::prepare(&mut handle) {
            Ok(endpoint) => endpoint,
            Err(e) => {
                if had_kernel_driver {
                    if let Err(e) = handle.attach_kernel_driver(INTERFACE) {
                        warn!("Falha ao reanexar driver do kernel: {e}");
                    }
                }
                return Err(e);
            }
        };

        info!("✓ MT8057 aberto (endpoint {endpoint:#04x})");
        Ok(Self {
            handle,
            endpoint,
            read_timeout,
            had_kernel_driver,
        })
    }

    fn prepare(handle: &mut DeviceHandle<GlobalContext>) -> Result<u8, DeviceError> {
        handle
            .set_active_configuration(1)
            .map_err(|e| DeviceError::Setup(format!("set_configuration: {e}")))?;
        let endpoint = find_endpoint(handle)?;
        handle
            .claim_interface(INTERFACE)
            .map_err(|e| DeviceError::Setup(format!("claim_interface: {e}")))?;
        Ok(endpoint)
    }
}

/// Primeiro endpoint de entrada da interface 0 / alt 0.
fn find_endpoint(handle: &DeviceHandle<GlobalContext>) -> Result<u8, DeviceError> {
    let config = handle
        .device()
        .active_config_descriptor()
        .map_err(|e| DeviceError::Setup(format!("descritor de configuração: {e}")))?;

    let endpoints: Vec<_> = config
        .interfaces()
        .filter(|i| i.number() == INTERFACE)
        .flat_map(|i| i.descriptors())
        .filter(|d| d.setting_number() == 0)
        .flat_map(|d| d.endpoint_descriptors().collect::<Vec<_>>())
        .collect();

    endpoints
        .iter()
        .find(|e| e.direction() == Direction::In && e.transfer_type() == TransferType::Interrupt)
        .or_else(|| endpoints.first())
        .map(|e| e.address())
        .ok_or_else(|| DeviceError::NotFound("nenhum endpoint na interface 0".into()))
}

impl GasDevice for Mt8057 {
    fn arm(&mut self) -> Result<(), DeviceError> {
        let request_type = rusb::request_type(Direction::Out, RequestType::Class, Recipient::Interface);
        self.handle
            .write_control(
                request_type,
                HID_SET_REPORT,
                HID_REPORT_TYPE_FEATURE,
                0,
                &MAGIC,
                CONTROL_TIMEOUT,
            )
            .map_err(|e| DeviceError::Arm(e.to_string()))?;
        debug!("MT8057 armado");
        Ok(())
    }

    fn read_frame(&mut self) -> Result<Option<RawFrame>, DeviceError> {
        let mut frame: RawFrame = [0; FRAME_LEN];
        match self
            .handle
            .read_interrupt(self.endpoint, &mut frame, self.read_timeout)
        {
            Ok(FRAME_LEN) => Ok(Some(frame)),
            Ok(n) => {
                debug!("Frame curto ({n} bytes) descartado");
                Ok(None)
            }
            Err(rusb::Error::Timeout) => Ok(None),
            Err(e) => Err(DeviceError::Read(e.to_string())),
        }
    }
}

impl Release for Mt8057 {
    fn release(&mut self) {
        if let Err(e) = self.handle.release_interface(INTERFACE) {
            warn!("Falha ao liberar interface do MT8057: {e}");
        }
        if self.had_kernel_driver {
            if let Err(e) = self.handle.attach_kernel_driver(INTERFACE) {
                warn!("Falha ao reanexar driver do kernel: {e}");
            }
        }
        debug!("MT8057 liberado");
    }
}
