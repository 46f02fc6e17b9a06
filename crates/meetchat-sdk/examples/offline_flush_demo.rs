//! 离线队列演示
//!
//! 使用本地后备服务，展示离线发送、恢复在线后按顺序回放、投递状态变化。
//!
//! 运行：cargo run --example offline_flush_demo

use meetchat_sdk::{init_logging, AuthorRef, HostNetworkSignal, MeetchatConfig, MeetchatSDK, SdkEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging(false);

    println!("\n🚀 离线队列演示\n");
    println!("====================================\n");

    let data_dir = std::env::temp_dir().join("meetchat_offline_demo");
    let config = MeetchatConfig::builder()
        .data_dir(&data_dir)
        .local_backend()
        .build()?;

    // 从离线状态启动
    let network = Arc::new(HostNetworkSignal::offline());
    let sdk = MeetchatSDK::initialize(config, network.clone()).await?;
    println!("✅ SDK 初始化完成，网络状态: {}\n", sdk.connectivity());

    let mut events = sdk.subscribe_events();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                SdkEvent::QueueLengthChanged { length, .. } => println!("   📥 队列长度: {}", length),
                SdkEvent::FlushCompleted { replayed, .. } => println!("   ✅ 回放完成: {} 个动作", replayed),
                SdkEvent::MessageStatusChanged {
                    message_id,
                    old_status,
                    new_status,
                    ..
                } => println!("   🔄 {}: {:?} -> {:?}", message_id, old_status, new_status),
                _ => {}
            }
        }
    });

    let _handle = sdk
        .subscribe("general", |message| {
            println!("   💬 [{}] {} ({:?})", message.author, message.content, message.status);
        })
        .await?;

    let alice = AuthorRef::new("alice");
    println!("【离线发送】");
    for content in ["hello", "anyone here?", "@bob 会议改到三点"] {
        sdk.send_message("general", content, &alice).await?;
    }
    sleep(Duration::from_millis(100)).await;
    println!("\n待回放动作: {}\n", sdk.queue_len().await);

    println!("【网络恢复】");
    network.set_online();
    sleep(Duration::from_secs(2)).await;

    println!("\n【频道历史】");
    for message in sdk.get_history("general").await? {
        println!("   {} {} {:?} mentions={:?}", message.id, message.content, message.status, message.mentions);
    }

    println!("\n{}", sdk.connection_state().summary());
    sdk.shutdown().await?;
    Ok(())
}
