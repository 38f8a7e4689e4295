use serde_json::json;

use bci_launcher::viewer::{SignalWindow, channel_labels};

#[test]
fn window_keeps_the_latest_samples() {
    let mut window = SignalWindow::new(2, 3);
    assert!(window.stats().is_none());
    for v in [100.0, 1.0, 2.0, 3.0] {
        window.push(&[v, -v]);
    }
    assert_eq!(window.len(), 3);

    let stats = window.stats().unwrap();
    assert_eq!(stats[0].mean, 2.0);
    assert_eq!(stats[0].min, 1.0);
    assert_eq!(stats[1].max, -1.0);
    let rms = ((1.0 + 4.0 + 9.0) / 3.0f64).sqrt();
    assert!((stats[1].rms - rms).abs() < 1e-12);

    window.clear();
    assert!(window.is_empty());
}

#[test]
fn short_samples_are_padded() {
    let mut window = SignalWindow::new(3, 10);
    window.push(&[1.0]);
    window.push(&[3.0, 4.0, 5.0, 6.0]);
    let stats = window.stats().unwrap();
    assert_eq!(stats.len(), 3);
    assert_eq!(stats[0].mean, 2.0);
    assert_eq!(stats[2].mean, 5.0);

    let mut empty = SignalWindow::new(1, 4);
    empty.push(&[f64::NAN]);
    assert!(empty.stats().unwrap()[0].mean.is_nan());
}

#[test]
fn table_uses_labels_then_indices() {
    let mut window = SignalWindow::new(2, 4);
    assert!(window.render_table(&[]).contains("(no samples)"));
    window.push(&[1.5, 2.5]);
    let table = window.render_table(&["C3".to_string()]);
    assert!(table.contains("C3"));
    assert!(table.contains("ch2"));
    assert!(table.contains("1.500"));
}

#[test]
fn labels_from_description() {
    let desc = json!({"channels": {"channel": [{"label": "C3"}, {"label": "Cz"}, {}]}});
    assert_eq!(channel_labels(&desc), ["C3", "Cz", ""]);

    let single = json!({"channels": {"channel": {"label": "Fp1"}}});
    assert_eq!(channel_labels(&single), ["Fp1"]);
    assert!(channel_labels(&json!({})).is_empty());
}
