// Scripted two-device walkthrough running entirely in-process over the
// loopback transport: discovery, invitation, live chat, divergent histories
// and the conflict handshake.

use anyhow::Result;
use colored::*;
use tincan_core::transport::local::DevicePair;
use tincan_core::ChatMessage;

const A: usize = DevicePair::A;
const B: usize = DevicePair::B;

pub fn run() -> Result<()> {
    println!("{}", "Tincan two-device demo".bold());
    println!();

    let mut pair = DevicePair::new("Alice", "Bob")
        .map_err(|e| anyhow::anyhow!("failed to create demo cores: {e}"))?;

    step("Both devices start browsing and find each other");
    pair.core(A).connect();
    pair.core(B).connect();
    pair.introduce();
    for peer in pair.core(A).peers() {
        let hint = if peer.state.is_user_actionable() {
            " (invitable)".dimmed()
        } else {
            "".normal()
        };
        println!(
            "  Alice sees {} [{}]{}",
            peer.display_name.bright_cyan(),
            peer.state,
            hint
        );
    }

    step("Alice invites Bob; Bob accepts");
    let a_dev = pair.device_id(A).to_string();
    let b_dev = pair.device_id(B).to_string();
    pair.core(A).invite_peer(&b_dev);
    pair.pump();
    pair.core(B).resolve_invitation(&a_dev, true);
    pair.pump();
    println!(
        "  connected: Alice↔Bob = {}",
        (!pair.core(A).connected_peers().is_empty())
            .to_string()
            .bright_green()
    );

    step("They chat");
    pair.core(A).send_message("Hey Bob, can you hear me?")?;
    pair.core(B).send_message("Loud and clear.")?;
    pair.pump();
    print_history("Bob", pair.core(B).messages());

    step("They disconnect and each writes alone");
    pair.core(A).disconnect();
    pair.core(B).disconnect();
    pair.pump();
    pair.core(A).send_message("Note to self: buy string")?;
    pair.core(B).send_message("Note to self: buy cans")?;

    step("Reconnecting surfaces a history conflict on both devices");
    pair.introduce();
    pair.core(A).invite_peer(&b_dev);
    pair.pump();
    pair.core(B).resolve_invitation(&a_dev, true);
    pair.pump();
    if let Some((_, name)) = pair.core(A).pending_conflict() {
        println!("  Alice: conflict with {}", name.bright_yellow());
    }
    if let Some((_, name)) = pair.core(B).pending_conflict() {
        println!("  Bob:   conflict with {}", name.bright_yellow());
    }

    step("Alice keeps her history; Bob's device adopts it");
    pair.core(A)
        .resolve_sync_conflict(false)
        .map_err(|e| anyhow::anyhow!("conflict resolution failed: {e}"))?;
    pair.pump();

    println!();
    print_history("Alice", pair.core(A).messages());
    print_history("Bob", pair.core(B).messages());

    let a_ids: Vec<_> = non_system_ids(pair.core(A).messages());
    let b_ids: Vec<_> = non_system_ids(pair.core(B).messages());
    println!();
    if a_ids == b_ids {
        println!("{} Both devices converged on the same history", "✓".green());
    } else {
        println!("{} Devices diverged; this is a bug", "✗".red());
    }
    Ok(())
}

fn step(title: &str) {
    println!();
    println!("{} {}", "▶".bright_blue(), title.bold());
}

fn print_history(owner: &str, messages: Vec<ChatMessage>) {
    println!("  {} history:", owner.bold());
    for msg in messages {
        if msg.is_system {
            println!("    {}", format!("[{}]", msg.content).dimmed());
        } else {
            println!("    {}: {}", msg.sender_name.bright_cyan(), msg.content);
        }
    }
}

fn non_system_ids(messages: Vec<ChatMessage>) -> Vec<uuid::Uuid> {
    let mut ids: Vec<_> = messages
        .into_iter()
        .filter(|m| !m.is_system)
        .map(|m| m.id)
        .collect();
    ids.sort();
    ids
}
