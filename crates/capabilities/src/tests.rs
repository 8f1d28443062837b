// HTTP tests for the capability clients against a mock server

#[cfg(test)]
mod language_tests {
    use crate::{LanguageClient, LanguageDetector, PiiRedactor, ServiceConfig};
    use inbound_durable::capability::CapabilityError;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> LanguageClient {
        LanguageClient::new(
            ServiceConfig::new(&server.uri())
                .unwrap()
                .with_api_key("lang-key"),
        )
    }

    #[tokio::test]
    async fn test_detect_language() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/language/:analyze-text"))
            .and(query_param("api-version", "2023-04-01"))
            .and(header("Ocp-Apim-Subscription-Key", "lang-key"))
            .and(body_partial_json(json!({"kind": "LanguageDetection"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "kind": "LanguageDetectionResults",
                "results": {
                    "documents": [{
                        "id": "1",
                        "detectedLanguage": {"name": "French", "iso6391Name": "FR", "confidenceScore": 0.98}
                    }],
                    "errors": []
                }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let language = client(&server).detect("bonjour").await.unwrap();
        assert_eq!(language.iso_code, "fr");
        assert_eq!(language.name, "French");
    }

    #[tokio::test]
    async fn test_document_error_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/language/:analyze-text"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": {
                    "documents": [],
                    "errors": [{"id": "1", "error": {"message": "Document text is empty."}}]
                }
            })))
            .mount(&server)
            .await;

        let err = client(&server).detect("").await.unwrap_err();
        assert!(err.to_string().contains("Document text is empty."));
    }

    #[tokio::test]
    async fn test_redact() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/language/:analyze-text"))
            .and(body_partial_json(json!({
                "kind": "PiiEntityRecognition",
                "analysisInput": {"documents": [{"id": "1", "language": "en", "text": "Call John"}]}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": {
                    "documents": [{
                        "id": "1",
                        "redactedText": "Call ****",
                        "entities": [{"text": "John", "category": "Person"}]
                    }],
                    "errors": []
                }
            })))
            .mount(&server)
            .await;

        let result = client(&server).redact("Call John", "en").await.unwrap();
        assert_eq!(result.redacted_text, "Call ****");
        assert_eq!(result.entities[0]["category"], "Person");
    }

    #[tokio::test]
    async fn test_status_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .mount(&server)
            .await;

        let err = client(&server).detect("hello").await.unwrap_err();
        assert!(
            matches!(err, CapabilityError::Status { status: 401, ref body } if body == "bad key")
        );
    }
}

#[cfg(test)]
mod translator_tests {
    use crate::{ServiceConfig, Translator, TranslatorClient};
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_translate() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/translate"))
            .and(query_param("api-version", "3.0"))
            .and(query_param("to", "en"))
            .and(query_param("from", "fr"))
            .and(header("Ocp-Apim-Subscription-Region", "westeurope"))
            .and(body_json(json!([{"Text": "bonjour"}])))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"translations": [{"text": "hello", "to": "en"}]}
            ])))
            .expect(1)
            .mount(&server)
            .await;

        let client = TranslatorClient::new(ServiceConfig::new(&server.uri()).unwrap())
            .with_region("westeurope");
        let translated = client.translate("bonjour", Some("fr"), "en").await.unwrap();
        assert_eq!(translated, "hello");
    }

    #[tokio::test]
    async fn test_empty_translation_is_invalid() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/translate"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;

        let client = TranslatorClient::new(ServiceConfig::new(&server.uri()).unwrap());
        assert!(client.translate("bonjour", None, "en").await.is_err());
    }
}

#[cfg(test)]
mod document_tests {
    use crate::{DocumentAnalysisClient, DocumentAnalyzer, ServiceConfig};
    use inbound_durable::capability::OperationStatus;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const RESULT_PATH: &str = "/formrecognizer/documentModels/prebuilt-document/analyzeResults/op-1";

    fn client(server: &MockServer) -> DocumentAnalysisClient {
        DocumentAnalysisClient::new(
            ServiceConfig::new(&server.uri())
                .unwrap()
                .with_api_key("di-key"),
        )
    }

    async fn status(server: &MockServer, body: serde_json::Value) -> OperationStatus {
        Mock::given(method("GET"))
            .and(path(RESULT_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(server)
            .await;
        let operation = format!("{}{RESULT_PATH}?api-version=2023-07-31", server.uri());
        client(server).operation_status(&operation).await.unwrap()
    }

    #[tokio::test]
    async fn test_begin_analysis_returns_operation_location() {
        let server = MockServer::start().await;
        let operation = format!("{}{RESULT_PATH}", server.uri());
        Mock::given(method("POST"))
            .and(path("/formrecognizer/documentModels/prebuilt-document:analyze"))
            .and(header("Content-Type", "application/octet-stream"))
            .and(header("Ocp-Apim-Subscription-Key", "di-key"))
            .respond_with(
                ResponseTemplate::new(202).insert_header("Operation-Location", operation.as_str()),
            )
            .expect(1)
            .mount(&server)
            .await;

        let id = client(&server)
            .begin_analysis("prebuilt-document", b"%PDF-1.7".to_vec())
            .await
            .unwrap();
        assert_eq!(id, operation);
    }

    #[tokio::test]
    async fn test_begin_analysis_without_location_fails() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(202))
            .mount(&server)
            .await;

        let result = client(&server)
            .begin_analysis("prebuilt-layout", vec![1, 2, 3])
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_running_operation() {
        let server = MockServer::start().await;
        let result = status(&server, json!({"status": "running"})).await;
        assert_eq!(result, OperationStatus::Running);
    }

    #[tokio::test]
    async fn test_succeeded_operation() {
        let server = MockServer::start().await;
        let result = status(
            &server,
            json!({"status": "succeeded", "analyzeResult": {"content": "Claim form", "pages": []}}),
        )
        .await;
        let OperationStatus::Completed(Some(result)) = result else {
            panic!("expected a result");
        };
        assert_eq!(result.content, "Claim form");
        assert_eq!(result.raw["pages"], json!([]));
    }

    #[tokio::test]
    async fn test_failed_operation_has_no_result() {
        let server = MockServer::start().await;
        let result = status(
            &server,
            json!({"status": "failed", "error": {"code": "InvalidContent"}}),
        )
        .await;
        assert_eq!(result, OperationStatus::Completed(None));
    }

    #[tokio::test]
    async fn test_foreign_operation_url_is_rejected() {
        let server = MockServer::start().await;
        let result = client(&server)
            .operation_status("https://elsewhere.example.com/analyzeResults/op-1")
            .await;
        assert!(result.is_err());
    }
}

#[cfg(test)]
mod vision_tests {
    use crate::{ImageAnalysisClient, ImageAnalyzer, ServiceConfig};
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_analyze_image() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/computervision/imageanalysis:analyze"))
            .and(query_param("features", "tags,read,objects,caption"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "tagsResult": {"values": [{"name": "car", "confidence": 0.9}]},
                "readResult": {"blocks": []}
            })))
            .mount(&server)
            .await;

        let client = ImageAnalysisClient::new(ServiceConfig::new(&server.uri()).unwrap());
        let analysis = client.analyze(vec![0x89, b'P', b'N', b'G']).await.unwrap();
        assert_eq!(analysis.tag_summary(), "car:0.9");
        assert!(analysis.raw.get("readResult").is_some());
    }
}

#[cfg(test)]
mod chat_tests {
    use crate::{ChatDescriber, ImageDescriber, ServiceConfig};
    use inbound_durable::capability::DescribePrompt;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_describe_image() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/openai/deployments/gpt-4o/chat/completions"))
            .and(query_param("api-version", "2024-06-01"))
            .and(header("api-key", "chat-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"role": "assistant", "content": "A flooded basement."}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let describer = ChatDescriber::new(
            ServiceConfig::new(&server.uri())
                .unwrap()
                .with_api_key("chat-key"),
            "gpt-4o",
        );
        let description = describer
            .describe(b"jpeg".to_vec(), "image/jpeg", &DescribePrompt::default())
            .await
            .unwrap();
        assert_eq!(description, "A flooded basement.");
    }

    #[tokio::test]
    async fn test_no_choices() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": []})))
            .mount(&server)
            .await;

        let describer = ChatDescriber::new(ServiceConfig::new(&server.uri()).unwrap(), "gpt-4o");
        let result = describer
            .describe(b"jpeg".to_vec(), "image/jpeg", &DescribePrompt::default())
            .await;
        assert!(result.is_err());
    }
}
