use std::time::Duration;

use heihei_common::{Level, PlugCode};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

use crate::pins::{EncoderPins, PinError, PinWrites};

/// Time for the encoder latch to settle after the data lines change.
const SETTLE: Duration = Duration::from_millis(100);
/// How long the modulator stays enabled for one transmission.
const TRANSMIT: Duration = Duration::from_millis(250);

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error(transparent)]
    Pin(#[from] PinError),
}

/// The RF remote's encoder chip.
///
/// All plugs share one set of lines, so every transmission runs under a single lock.
pub struct Encoder {
    pins: Mutex<EncoderPins>,
}

impl Encoder {
    /// Takes ownership of the lines and parks them: data 0000, modulator off, ASK mode.
    pub async fn new(pins: EncoderPins) -> Result<Self, EncodeError> {
        let encoder = Self {
            pins: Mutex::new(pins),
        };

        {
            let mut guard = encoder.pins.lock().await;
            let pins = &mut *guard;
            let mut writes = PinWrites::new();
            writes.off(pins.d3.as_mut());
            writes.off(pins.d2.as_mut());
            writes.off(pins.d1.as_mut());
            writes.off(pins.d0.as_mut());
            writes.off(pins.enable.as_mut());
            writes.off(pins.mode.as_mut());
            writes.finish()?;
        }

        Ok(encoder)
    }

    /// Wraps lines without parking them first.
    #[cfg(test)]
    pub(crate) fn unparked(pins: EncoderPins) -> Self {
        Self {
            pins: Mutex::new(pins),
        }
    }

    /// Sends one on/off code to `plug`.
    ///
    /// Every line is driven even if an earlier write failed; the last failure is
    /// returned once the modulator has been switched off again.
    pub async fn transmit(&self, plug: PlugCode, on: bool) -> Result<(), EncodeError> {
        let mut guard = self.pins.lock().await;
        let pins = &mut *guard;
        let mut writes = PinWrites::new();

        let [d2, d1, d0] = plug.pattern();
        writes.set(pins.d2.as_mut(), d2);
        writes.set(pins.d1.as_mut(), d1);
        writes.set(pins.d0.as_mut(), d0);
        writes.set(pins.d3.as_mut(), Level::from(on));

        tokio::time::sleep(SETTLE).await;

        writes.on(pins.enable.as_mut());
        tokio::time::sleep(TRANSMIT).await;
        writes.off(pins.enable.as_mut());

        debug!("transmitted {} {}", plug.as_str(), if on { "on" } else { "off" });
        writes.finish().map_err(EncodeError::from)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use heihei_common::Level::{High, Low};
    use tokio::time::Instant;

    use super::*;
    use crate::pins::testing::recording_pins;

    fn writes(entries: &[(&str, Level)]) -> Vec<(String, Level)> {
        entries
            .iter()
            .map(|(name, level)| (name.to_string(), *level))
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn init_parks_all_lines_low() {
        let (pins, log) = recording_pins(None);
        Encoder::new(pins).await.unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            writes(&[
                ("d3", Low),
                ("d2", Low),
                ("d1", Low),
                ("d0", Low),
                ("enable", Low),
                ("mode", Low),
            ])
        );
    }

    #[tokio::test(start_paused = true)]
    async fn transmit_follows_remote_protocol() {
        let (pins, log) = recording_pins(None);
        let encoder = Encoder::new(pins).await.unwrap();
        log.lock().unwrap().clear();

        let started = Instant::now();
        encoder.transmit(PlugCode::Two, true).await.unwrap();

        assert!(started.elapsed() >= SETTLE + TRANSMIT);
        assert_eq!(
            *log.lock().unwrap(),
            writes(&[
                ("d2", High),
                ("d1", High),
                ("d0", Low),
                ("d3", High),
                ("enable", High),
                ("enable", Low),
            ])
        );
    }

    #[tokio::test(start_paused = true)]
    async fn each_plug_selects_its_pattern() {
        let cases = [
            (PlugCode::All, [Low, High, High]),
            (PlugCode::One, [High, High, High]),
            (PlugCode::Two, [High, High, Low]),
        ];

        for (plug, [d2, d1, d0]) in cases {
            let (pins, log) = recording_pins(None);
            let encoder = Encoder::new(pins).await.unwrap();
            log.lock().unwrap().clear();

            encoder.transmit(plug, false).await.unwrap();

            let log = log.lock().unwrap();
            assert_eq!(
                log[..4],
                writes(&[("d2", d2), ("d1", d1), ("d0", d0), ("d3", Low)])[..],
                "{plug:?}"
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn failed_write_still_completes_sequence() {
        let (pins, log) = recording_pins(Some("d1"));
        let encoder = Encoder::unparked(pins);

        let err = encoder.transmit(PlugCode::One, true).await.unwrap_err();

        assert!(err.to_string().contains("pin d1 set high failure"));
        let log = log.lock().unwrap();
        assert_eq!(log.last(), Some(&("enable".to_string(), Low)));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_init_is_reported() {
        let (pins, _log) = recording_pins(Some("mode"));
        assert!(Encoder::new(pins).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_transmissions_do_not_interleave() {
        let (pins, log) = recording_pins(None);
        let encoder = Arc::new(Encoder::new(pins).await.unwrap());
        log.lock().unwrap().clear();

        let first = tokio::spawn({
            let encoder = encoder.clone();
            async move { encoder.transmit(PlugCode::One, true).await }
        });
        let second = tokio::spawn({
            let encoder = encoder.clone();
            async move { encoder.transmit(PlugCode::Two, false).await }
        });
        first.await.unwrap().unwrap();
        second.await.unwrap().unwrap();

        let log = log.lock().unwrap();
        assert_eq!(log.len(), 12);
        for frame in log.chunks(6) {
            assert_eq!(frame[4], ("enable".to_string(), High));
            assert_eq!(frame[5], ("enable".to_string(), Low));
        }
    }
}
