//! 苏格拉底对话与法理图谱生成的集成测试

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use nexus::config::{DoctrineSection, SocraticSection};
    use nexus::doctrine::{DoctrinalGenerator, DoctrineError, DoctrineStage};
    use nexus::graph::{EntityStore, LayoutConfig, NewNode, NodeKind};
    use nexus::library::{InMemoryLibrary, UniverseLibrary};
    use nexus::llm::{LlmError, ScriptedLlmClient, ScriptedReply};
    use nexus::socratic::{ConnectionDialogue, DialogueInput, DialogueState, SocraticError};
    use nexus::Workspace;

    #[tokio::test]
    async fn test_connection_content_is_always_latest_question() {
        let mut store = EntityStore::new("u", LayoutConfig::default());
        let a = store.create_nexus("Justice", "fairness", vec![]);
        let b = store.add_node(NewNode::new(a.clone(), "mercy")).unwrap();
        let conn = store.connect(&a, &b).unwrap();

        let llm = Arc::new(
            ScriptedLlmClient::new()
                .on("Idea A", ScriptedReply::ok("Q0"))
                .on("answer 2", ScriptedReply::err(LlmError::RateLimited("slow down".into())))
                .on("answer", ScriptedReply::ok("Q1"))
                .on("answer", ScriptedReply::ok("Q2"))
                .on("answer", ScriptedReply::ok("Q3")),
        );
        let mut dialogue =
            ConnectionDialogue::new(llm, &store, conn.clone(), &SocraticSection::default()).unwrap();
        dialogue
            .advance(&mut store, DialogueInput::Open { seed: None })
            .await
            .unwrap();
        assert_eq!(store.get_node(&conn).unwrap().content, "Q0");

        let mut completed = 0;
        for (text, expected) in [("answer 1", "Q1"), ("answer 2", "Q1"), ("answer 3", "Q2"), ("answer 4", "Q3")] {
            let result = dialogue.advance(&mut store, DialogueInput::Answer(text.into())).await;
            match result {
                Ok(step) => {
                    completed += 1;
                    assert_eq!(step.focus, conn);
                    assert_eq!(step.appended.len(), 2);
                }
                Err(e) => assert!(matches!(e, SocraticError::Llm(LlmError::RateLimited(_)))),
            }
            let node = store.get_node(&conn).unwrap();
            assert_eq!(node.content, expected);
            assert_eq!(node.child_ids.len(), 2 * completed);
            assert_eq!(dialogue.state(), DialogueState::Active);
        }
        assert_eq!(completed, 3);

        // 子节点都直接挂在连接节点下，回答 / 问题交替
        let kinds: Vec<_> = store
            .children_of(&conn)
            .iter()
            .map(|id| store.get_node(id).unwrap().kind)
            .collect();
        assert_eq!(
            kinds,
            [NodeKind::SocraticAnswer, NodeKind::SocraticQuestion].repeat(3)
        );
        store.validate().unwrap();
    }

    #[tokio::test]
    async fn test_missing_bridge_target_still_opens() {
        let mut store = EntityStore::new("u", LayoutConfig::default());
        let a = store.create_nexus("A", "alpha", vec![]);
        let b = store.create_nexus("B", "beta", vec![]);
        let conn = store.connect(&a, &b).unwrap();

        // B 端是弱引用：外部数据里 B 已不存在时仍可开场
        let mut universe = store.into_universe();
        universe.nexuses.retain(|n| n.id != b);
        let mut store = EntityStore::from_universe(universe, LayoutConfig::default());
        assert!(store.bridge_partner(&conn).is_none());

        let llm = Arc::new(ScriptedLlmClient::new().otherwise(ScriptedReply::ok("What links them?")));
        let mut dialogue =
            ConnectionDialogue::new(llm.clone(), &store, conn.clone(), &SocraticSection::default()).unwrap();
        let step = dialogue
            .advance(&mut store, DialogueInput::Open { seed: None })
            .await
            .unwrap();
        assert_eq!(step.question.as_deref(), Some("What links them?"));
        let prompt = llm.calls()[0].last_user().unwrap().to_string();
        assert!(prompt.contains("alpha"));
        assert!(!prompt.contains("beta"));
    }

    #[tokio::test]
    async fn test_doctrine_builds_universe_from_fenced_response() {
        let cases: Vec<_> = (0..6)
            .map(|i| format!(r#"{{"name": "Case {i}", "citation": "{i} U.S. 1", "summary": "line one
line two"}}"#))
            .collect();
        let raw = format!(
            "```json\n{{\"rule\": \"Miranda warnings\", \"elements\": [\"custody\", \"interrogation\"], \"cases\": [{}]}}\n```",
            cases.join(",")
        );
        let llm = Arc::new(ScriptedLlmClient::new().otherwise(ScriptedReply::ok(raw)));
        let library = Arc::new(InMemoryLibrary::new());
        let mut ws = Workspace::new(library.clone(), LayoutConfig::default());
        let mut generator = DoctrinalGenerator::new(
            llm,
            DoctrineSection {
                checkpoint_delay_ms: 0,
                case_delay_ms: 1,
                ..Default::default()
            },
        );

        let outcome = generator.run("custodial interrogation", &mut ws).await.unwrap();
        assert_eq!(generator.stage(), DoctrineStage::Complete);
        assert_eq!(outcome.cases.len(), 6);

        let store = ws.current().unwrap();
        let first = store.get_node(&outcome.cases[0]).unwrap();
        assert_eq!(first.title, "Case 0");
        assert_eq!(first.kind, NodeKind::Doctrine);
        assert!(first.content.contains("line one\nline two"));
        assert_eq!(library.load(&outcome.universe_id).unwrap().unwrap(), *store.universe());
        library.create_snapshot(&outcome.universe_id).unwrap();
    }

    #[tokio::test]
    async fn test_doctrine_failure_leaves_workspace_untouched() {
        let llm = Arc::new(ScriptedLlmClient::new().otherwise(ScriptedReply::ok("I cannot help with that.")));
        let library = Arc::new(InMemoryLibrary::new());
        let mut ws = Workspace::new(library.clone(), LayoutConfig::default());
        let original = ws.create_universe("existing").id().to_string();

        let mut generator = DoctrinalGenerator::new(
            llm,
            DoctrineSection {
                checkpoint_delay_ms: 0,
                error_reset_ms: 0,
                ..Default::default()
            },
        );
        let err = generator.run("anything", &mut ws).await.unwrap_err();
        assert!(matches!(err, DoctrineError::Parse(_)));
        assert_eq!(ws.current().unwrap().id(), original);
        assert!(library.list().unwrap().is_empty());

        match generator.stage() {
            DoctrineStage::Error { message } => assert!(!message.is_empty()),
            other => panic!("expected error stage, got {other}"),
        }
        // 出错后可直接开始新主题
        assert!(generator.start("another").is_ok());
    }
}
