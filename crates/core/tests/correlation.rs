//! Request/response correlation over a shared channel.

mod common;

use std::collections::HashMap;
use std::time::Duration;

use pagebridge::protocol::{OperationResult, PromptRequest, TextOutput};
use pagebridge::{Channel, Correlator, CorrelatorConfig, Error};
use serde_json::json;
use tokio_util::sync::CancellationToken;

fn text(text: &str) -> OperationResult<TextOutput> {
	OperationResult::Success(TextOutput { text: text.to_string() })
}

#[tokio::test]
async fn prompt_round_trip_matches_wire_format() {
	common::init_tracing();
	let channel = Channel::new(16);
	let mut page = channel.subscribe();
	let correlator = Correlator::new(channel.clone());

	let responder = {
		let channel = channel.clone();
		tokio::spawn(async move {
			let request = page.recv().await.unwrap();
			assert_eq!(request, json!({"kind": "PROMPT", "requestId": 1, "text": "hi"}));
			channel.post(json!({
				"kind": "PROMPT_RESULT",
				"requestId": 1,
				"result": {"kind": "success", "text": "hello"},
			}));
		})
	};

	let result = correlator
		.language_model()
		.call(&PromptRequest::new("hi"), &CancellationToken::new())
		.await
		.unwrap();
	responder.await.unwrap();
	assert_eq!(result, text("hello"));
}

#[tokio::test]
async fn responses_out_of_order_reach_their_callers() {
	common::init_tracing();
	let channel = Channel::new(16);
	let mut page = channel.subscribe();
	let client = Correlator::new(channel.clone()).language_model();

	let responder = {
		let channel = channel.clone();
		tokio::spawn(async move {
			let mut ids = HashMap::new();
			while ids.len() < 3 {
				let request = page.recv().await.unwrap();
				if request["kind"] == "PROMPT" {
					let id = request["requestId"].as_u64().unwrap();
					ids.insert(id, request["text"].as_str().unwrap().to_string());
				}
			}
			assert_eq!(ids.keys().copied().max(), Some(3));
			for id in [3, 1, 2] {
				channel.post(json!({
					"kind": "PROMPT_RESULT",
					"requestId": id,
					"result": {"kind": "success", "text": format!("re: {}", ids[&id])},
				}));
			}
		})
	};

	let signal = CancellationToken::new();
	let (req_one, req_two, req_three) = (
		PromptRequest::new("one"),
		PromptRequest::new("two"),
		PromptRequest::new("three"),
	);
	let (first, second, third) = tokio::join!(
		client.call(&req_one, &signal),
		client.call(&req_two, &signal),
		client.call(&req_three, &signal),
	);
	responder.await.unwrap();

	assert_eq!(first.unwrap(), text("re: one"));
	assert_eq!(second.unwrap(), text("re: two"));
	assert_eq!(third.unwrap(), text("re: three"));
}

#[tokio::test]
async fn replies_for_other_capabilities_are_ignored() {
	common::init_tracing();
	let channel = Channel::new(16);
	let mut page = channel.subscribe();
	let client = Correlator::new(channel.clone()).language_model();

	let responder = {
		let channel = channel.clone();
		tokio::spawn(async move {
			let request = page.recv().await.unwrap();
			let id = request["requestId"].clone();
			channel.post(json!({"kind": "WRITE_RESULT", "requestId": id, "result": {"kind": "success", "text": "wrong"}}));
			channel.post(json!({"kind": "PROMPT_STREAMING_SETUP_RESULT", "requestId": id, "result": {"kind": "success"}}));
			channel.post(json!({"type": "SOME_OTHER_EXTENSION", "requestId": id}));
			channel.post(json!({"kind": "PROMPT_RESULT", "requestId": id, "result": {"kind": "no-model-available"}}));
		})
	};

	let result = client
		.call(&PromptRequest::new("hi"), &CancellationToken::new())
		.await
		.unwrap();
	responder.await.unwrap();
	assert_eq!(result, OperationResult::NoModelAvailable);
}

#[tokio::test]
async fn silent_page_times_out_and_is_told_to_abort() {
	common::init_tracing();
	let channel = Channel::new(16);
	let mut page = channel.subscribe();
	let correlator = Correlator::with_config(
		channel.clone(),
		CorrelatorConfig {
			request_timeout: Some(Duration::from_millis(50)),
		},
	);

	let err = correlator
		.call(&PromptRequest::new("hi"), &CancellationToken::new())
		.await
		.unwrap_err();
	assert!(matches!(err, Error::Timeout { timeout, .. } if timeout == Duration::from_millis(50)));

	assert_eq!(page.recv().await.unwrap()["kind"], "PROMPT");
	assert_eq!(page.recv().await.unwrap(), json!({"kind": "PROMPT_ABORT", "requestId": 1}));
}

#[tokio::test]
async fn closing_the_channel_fails_pending_calls() {
	common::init_tracing();
	let channel = Channel::new(16);
	let mut page = channel.subscribe();
	let client = Correlator::new(channel.clone()).language_model();

	let call = tokio::spawn(async move { client.call(&PromptRequest::new("hi"), &CancellationToken::new()).await });
	page.recv().await.unwrap();
	channel.close();

	let err = call.await.unwrap().unwrap_err();
	assert!(matches!(err, Error::ChannelClosed));
}
