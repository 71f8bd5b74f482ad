/// Basic usage example: feed accelerometer samples, let the countdown run out
use std::sync::Arc;

use crash_sentinel::capabilities::{
    MockClock, MockLocation, MockPermissions, MockSender, MockSensor, MockTimer,
};
use crash_sentinel::{HostCapabilities, LocationFix, MonitoringController, Sample, SentinelConfig};

fn main() {
    println!("=== Crash Sentinel: Basic Example ===\n");

    let config = SentinelConfig::from_toml_str(r#"contact = "555-0100""#)
        .expect("inline config is valid");

    // Mock host: the clock and timer are driven by hand below
    let clock = MockClock::new();
    let sender = MockSender::new();
    let host = HostCapabilities {
        sensor: Box::new(MockSensor::new()),
        location: Arc::new(MockLocation::fixed(LocationFix::new(48.858370, 2.294481))),
        sender: Arc::new(sender.clone()),
        permissions: Arc::new(MockPermissions::granted()),
    };
    let mut controller =
        MonitoringController::new(&config, host, Box::new(MockTimer::new()), Arc::new(clock.clone()));
    controller.set_observer(Box::new(|status| println!("  status: {}", status)));

    controller.enable().expect("mock sensor is available");

    // Phone resting in a cradle, then a violent jolt
    let mut samples: Vec<Sample> = (0..50)
        .map(|i| Sample::new(i * 20, [0.02, -0.01, 9.81]))
        .collect();
    samples.push(Sample::new(1_000, [45.0, 12.0, 9.81]));

    println!("Processing {} samples...\n", samples.len());
    for sample in &samples {
        if let Some(event) = controller.on_sample(sample) {
            println!(
                "Impact at {}ms: {:.1} m/s² linear acceleration\n",
                event.timestamp_ms, event.magnitude
            );
        }
    }

    // Nobody presses cancel
    for _ in 0..30 {
        clock.advance(1_000);
        if let Ok(Some(outcome)) = controller.tick_and_escalate() {
            println!("\nEscalation completed: {}", outcome.is_completed());
        }
    }

    for (recipient, body) in sender.sent() {
        println!("SMS to {}: {}", recipient, body);
    }
}
