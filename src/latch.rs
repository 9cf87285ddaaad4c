//! Servo driven latch bolt.
//!
//! The bolt pivots on a position controlled servo: 0 degrees is the rest
//! (fully closed) position, the configured open angle swings it clear.
//! Standard 50 Hz hobby servo signal, 0.5 ms..2.5 ms pulse for 0..180
//! degrees, generated by the LEDC peripheral.

use esp_idf_svc::hal::gpio::AnyIOPin;
use esp_idf_svc::hal::ledc::config::TimerConfig;
use esp_idf_svc::hal::ledc::{LedcDriver, LedcTimerDriver, Resolution, CHANNEL0, TIMER0};
use esp_idf_svc::hal::units::Hertz;

/// Commands are fire-and-forget: the mechanism reports no position
/// feedback.
pub trait Actuator {
    fn open(&mut self) -> anyhow::Result<()>;
    fn reset(&mut self) -> anyhow::Result<()>;
}

const PWM_FREQ_HZ: u32 = 50;
const PERIOD_US: u32 = 20_000;
const PULSE_MIN_US: u32 = 500;
const PULSE_MAX_US: u32 = 2_500;
const ANGLE_MAX: u32 = 180;

pub struct ServoLatch<'d> {
    driver: LedcDriver<'d>,
    open_angle: u32,
}

impl<'d> ServoLatch<'d> {
    pub fn new(pin: AnyIOPin, open_angle: u32) -> anyhow::Result<Self> {
        let config = TimerConfig::new()
            .resolution(Resolution::Bits14)
            .frequency(Hertz(PWM_FREQ_HZ));
        let timer_driver = LedcTimerDriver::new(unsafe { TIMER0::new() }, &config)?;
        let driver = LedcDriver::new(unsafe { CHANNEL0::new() }, timer_driver, pin)?;

        Ok(Self {
            driver,
            open_angle: open_angle.min(ANGLE_MAX),
        })
    }

    fn set_angle(&mut self, degrees: u32) -> anyhow::Result<()> {
        let duty = angle_to_duty(self.driver.get_max_duty(), degrees);
        self.driver.set_duty(duty)?;
        Ok(())
    }
}

impl Actuator for ServoLatch<'_> {
    fn open(&mut self) -> anyhow::Result<()> {
        self.set_angle(self.open_angle)
    }

    fn reset(&mut self) -> anyhow::Result<()> {
        self.set_angle(0)
    }
}

fn angle_to_duty(max_duty: u32, degrees: u32) -> u32 {
    let degrees = degrees.min(ANGLE_MAX);
    let pulse_us = PULSE_MIN_US + (PULSE_MAX_US - PULSE_MIN_US) * degrees / ANGLE_MAX;
    max_duty * pulse_us / PERIOD_US
}

#[cfg(test)]
mod tests {
    use super::angle_to_duty;

    const MAX_DUTY: u32 = (1 << 14) - 1;

    #[test]
    fn rest_position_is_min_pulse() {
        // 0.5 ms out of 20 ms
        assert_eq!(angle_to_duty(MAX_DUTY, 0), MAX_DUTY * 500 / 20_000);
    }

    #[test]
    fn full_swing_is_max_pulse() {
        // 2.5 ms out of 20 ms
        assert_eq!(angle_to_duty(MAX_DUTY, 180), MAX_DUTY * 2_500 / 20_000);
    }

    #[test]
    fn midpoint_is_centered() {
        // 1.5 ms out of 20 ms
        assert_eq!(angle_to_duty(MAX_DUTY, 90), MAX_DUTY * 1_500 / 20_000);
    }

    #[test]
    fn angle_is_clamped() {
        assert_eq!(angle_to_duty(MAX_DUTY, 270), angle_to_duty(MAX_DUTY, 180));
    }

    #[test]
    fn duty_grows_with_angle() {
        let mut last = 0;
        for degrees in (0..=180).step_by(10) {
            let duty = angle_to_duty(MAX_DUTY, degrees);
            assert!(duty >= last);
            last = duty;
        }
    }
}
