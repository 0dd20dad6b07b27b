use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chanemu::{
    Burst, ChannelEmulator, ChannelMode, Collaborators, EmulatorConfig, EmulatorError, PaddingConfig,
    ReconfigMessage, Sample,
};

fn fifo_config(dir: &tempfile::TempDir) -> EmulatorConfig {
    EmulatorConfig {
        nof_channels: 2,
        pipe_base: dir.path().join("np_ch"),
        subframe_length: 1000,
        reconfig_poll: Duration::from_millis(20),
        seed: Some(1),
        ..Default::default()
    }
}

async fn recv_exact(emu: &ChannelEmulator, channel: usize, nof_samples: usize) -> Vec<Sample> {
    let mut buf = vec![Sample::default(); nof_samples];
    let n = emu.recv(channel, &mut buf).await.unwrap();
    assert_eq!(n, nof_samples);
    buf
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_fifo_channels_are_independent() {
    let dir = tempfile::tempdir().unwrap();
    let emu = Arc::new(ChannelEmulator::initialize(fifo_config(&dir), Collaborators::seeded(Some(1))).unwrap());
    assert!(dir.path().join("np_ch_0").exists());
    assert!(dir.path().join("np_ch_1").exists());

    let zero: Vec<Sample> = (0..4000).map(|i| Sample::new(i as f32, 0.0)).collect();
    let one: Vec<Sample> = (0..4000).map(|i| Sample::new(0.0, -(i as f32))).collect();

    // bursts larger than the pipe buffer need a concurrent reader
    let tx = {
        let emu = emu.clone();
        let (zero, one) = (zero.clone(), one.clone());
        tokio::spawn(async move {
            emu.send(0, Burst::whole(&zero)).await.unwrap();
            emu.send(1, Burst::whole(&one)).await.unwrap();
        })
    };

    assert_eq!(recv_exact(&emu, 0, 4000).await, zero);
    assert_eq!(recv_exact(&emu, 1, 4000).await, one);
    tx.await.unwrap();

    emu.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_fifo_alignment_and_live_awgn() {
    let dir = tempfile::tempdir().unwrap();
    let config = EmulatorConfig {
        nof_channels: 1,
        padding: PaddingConfig {
            align_to_subframe: true,
            ..Default::default()
        },
        ..fifo_config(&dir)
    };
    let emu = Arc::new(ChannelEmulator::initialize(config, Collaborators::seeded(Some(2))).unwrap());

    let sender = emu.reconfig_sender().unwrap();
    sender.send(ReconfigMessage::simple_awgn(10.0)).await.unwrap();
    while emu.settings().await.mode != ChannelMode::SimpleAwgn {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let burst = vec![Sample::new(1.0, 0.0); 1500];
    let tx = {
        let emu = emu.clone();
        let burst = burst.clone();
        tokio::spawn(async move { emu.send(0, Burst::whole(&burst)).await.unwrap() })
    };

    let received = recv_exact(&emu, 0, 2000).await;
    assert_eq!(tx.await.unwrap(), 2000);
    assert!((emu.settings().await.noise_variance - 0.1).abs() < 1e-5);

    // noise lands on the payload and on the padding alike
    let padding_power: f32 = received[1500..].iter().map(|s| s.norm_sqr()).sum::<f32>() / 500.0;
    assert!(padding_power > 0.05 && padding_power < 0.15, "padding power {}", padding_power);

    emu.shutdown().await.unwrap();
}

fn noise_power(received: &[Sample], sent: Sample) -> f32 {
    received.iter().map(|r| (*r - sent).norm_sqr()).sum::<f32>() / received.len() as f32
}

#[tokio::test(flavor = "multi_thread", worker_threads = 3)]
async fn test_snr_change_while_streaming() {
    const BURST: usize = 2000;
    let dir = tempfile::tempdir().unwrap();
    let config = EmulatorConfig {
        nof_channels: 1,
        ..fifo_config(&dir)
    };
    let emu = Arc::new(ChannelEmulator::initialize(config, Collaborators::seeded(Some(3))).unwrap());
    emu.set_simple_awgn(true).await;
    emu.set_snr(10.0).await;

    let unit = Sample::new(1.0, 0.0);
    let stop = Arc::new(AtomicBool::new(false));
    // each burst exceeds the pipe buffer, so the sender stays parked in
    // send while the receiver and the worker run
    let streamer = {
        let emu = emu.clone();
        let stop = stop.clone();
        tokio::spawn(async move {
            let burst = vec![unit; BURST];
            let mut bursts = 0usize;
            while !stop.load(Ordering::Relaxed) {
                match emu.send(0, Burst::whole(&burst)).await {
                    Ok(n) => assert_eq!(n, BURST),
                    Err(EmulatorError::ChannelClosed(0)) => break,
                    Err(e) => panic!("send failed: {}", e),
                }
                bursts += 1;
            }
            bursts
        })
    };

    for _ in 0..3 {
        let received = recv_exact(&emu, 0, BURST).await;
        let power = noise_power(&received, unit);
        assert!(power > 0.07 && power < 0.13, "noise power {} at 10 dB", power);
    }

    emu.reconfig_sender()
        .unwrap()
        .send(ReconfigMessage::simple_awgn(20.0))
        .await
        .unwrap();

    // the next burst started after the worker ran re-derives the variance
    let mut drained = 0;
    while (emu.settings().await.noise_variance - 0.01).abs() > 1e-4 {
        recv_exact(&emu, 0, BURST).await;
        drained += 1;
        assert!(drained < 200, "variance never followed the new SNR");
    }
    assert_eq!(emu.settings().await.snr_db, 20.0);

    for _ in 0..3 {
        let received = recv_exact(&emu, 0, BURST).await;
        let power = noise_power(&received, unit);
        assert!(power > 0.007 && power < 0.013, "noise power {} at 20 dB", power);
    }

    stop.store(true, Ordering::Relaxed);
    tokio::time::timeout(Duration::from_secs(5), emu.shutdown())
        .await
        .expect("shutdown hung behind a streaming sender")
        .unwrap();
    let bursts = streamer.await.unwrap();
    assert!(bursts >= 6 + drained);
}

#[tokio::test]
async fn test_initialize_fails_on_missing_directory() {
    let config = EmulatorConfig {
        pipe_base: "/nonexistent/chanemu/np_ch".into(),
        ..Default::default()
    };
    let result = ChannelEmulator::initialize(config, Collaborators::default());
    assert!(matches!(result, Err(EmulatorError::PipeCreate { .. })));
}
