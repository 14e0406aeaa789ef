//! Multipart upload integration tests.

#[cfg(test)]
mod tests {
    use ruststack_s3_fs::content::ObjectContent;
    use ruststack_s3_fs::error::StoreError;
    use ruststack_s3_fs::metadata::MetadataMap;
    use ruststack_s3_fs::multipart::generate_upload_id;

    use crate::{TestStore, test_bucket_name};

    #[tokio::test]
    async fn test_should_assemble_parts_in_number_order() {
        let t = TestStore::new();
        let bucket = test_bucket_name("mpu");
        t.store.put_bucket(&bucket).await.expect("put_bucket");

        let upload_id = generate_upload_id();
        let mut metadata = MetadataMap::new();
        metadata.insert("content-type".into(), "text/plain".into());
        t.store
            .initiate_upload(&bucket, "big/file.txt", &upload_id, &metadata)
            .await
            .expect("initiate");

        // Uploaded out of order, completed out of order.
        for (n, body) in [(2, "B"), (3, "C"), (1, "A")] {
            t.store
                .put_part(&bucket, &upload_id, n, ObjectContent::from(body))
                .await
                .expect("put_part");
        }
        let result = t
            .store
            .put_object_multipart(&bucket, &upload_id, &[3, 1, 2])
            .await
            .expect("complete");
        assert_eq!(result.size, 3);

        let data = t.read(&bucket, "big/file.txt").await.expect("present");
        assert_eq!(&data[..], b"ABC");
        let head = t
            .store
            .head_object(&bucket, "big/file.txt")
            .await
            .expect("head")
            .expect("present");
        assert_eq!(head.content_type, "text/plain");
        assert_eq!(head.etag, result.etag);
        assert_eq!(head.content_length, 3);

        // The staging area is gone once the object is written.
        assert!(!t.root().join(&bucket).join("#s3fs.uploads").join(&upload_id).exists());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_should_accept_parts_staged_in_parallel() {
        let t = TestStore::new();
        let bucket = test_bucket_name("parallel");
        let upload_id = generate_upload_id();
        t.store
            .initiate_upload(&bucket, "joined", &upload_id, &MetadataMap::new())
            .await
            .expect("initiate");

        let tasks: Vec<_> = [(3, "C"), (1, "A"), (2, "B")]
            .into_iter()
            .map(|(n, body)| {
                let store = t.store.clone();
                let bucket = bucket.clone();
                let upload_id = upload_id.clone();
                tokio::spawn(async move {
                    store
                        .put_part(&bucket, &upload_id, n, ObjectContent::from(body))
                        .await
                })
            })
            .collect();
        for staged in futures::future::join_all(tasks).await {
            staged.expect("task").expect("put_part");
        }

        let parts = t.store.list_parts(&bucket, &upload_id).await.expect("list_parts");
        assert_eq!(parts.len(), 3);
        assert_eq!(
            parts.iter().map(|p| p.part_number).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );

        t.store
            .put_object_multipart(&bucket, &upload_id, &[1, 2, 3])
            .await
            .expect("complete");
        let data = t.read(&bucket, "joined").await.expect("present");
        assert_eq!(&data[..], b"ABC");
    }

    #[tokio::test]
    async fn test_should_assemble_only_listed_parts() {
        let t = TestStore::new();
        let upload_id = generate_upload_id();
        t.store
            .initiate_upload("b", "k", &upload_id, &MetadataMap::new())
            .await
            .expect("initiate");
        for (n, body) in [(1, "one-"), (2, "two-"), (3, "three")] {
            t.store
                .put_part("b", &upload_id, n, ObjectContent::from(body))
                .await
                .expect("put_part");
        }

        t.store
            .put_object_multipart("b", &upload_id, &[1, 3])
            .await
            .expect("complete");
        assert_eq!(&t.read("b", "k").await.expect("present")[..], b"one-three");
    }

    #[tokio::test]
    async fn test_should_list_parts_after_replacing_one() {
        let t = TestStore::new();
        let upload_id = generate_upload_id();
        t.store
            .initiate_upload("b", "k", &upload_id, &MetadataMap::new())
            .await
            .expect("initiate");
        for (n, body) in [(2, "bb"), (1, "a"), (2, "BBB")] {
            t.store
                .put_part("b", &upload_id, n, ObjectContent::from(body))
                .await
                .expect("put_part");
        }

        let parts = t.store.list_parts("b", &upload_id).await.expect("list_parts");
        let summary: Vec<_> = parts.iter().map(|p| (p.part_number, p.size)).collect();
        assert_eq!(summary, vec![(1, 1), (2, 3)]);
    }

    #[tokio::test]
    async fn test_should_fail_completion_with_missing_part() {
        let t = TestStore::new();
        let upload_id = generate_upload_id();
        t.store
            .initiate_upload("b", "k", &upload_id, &MetadataMap::new())
            .await
            .expect("initiate");
        t.store
            .put_part("b", &upload_id, 1, ObjectContent::from("A"))
            .await
            .expect("put_part");

        let err = t
            .store
            .put_object_multipart("b", &upload_id, &[1, 2])
            .await
            .expect_err("missing part");
        assert!(err.is_not_found());
        assert!(!t.store.exists_object("b", "k").await.expect("exists"));
        // The upload can still be completed with the parts that exist.
        t.store
            .put_object_multipart("b", &upload_id, &[1])
            .await
            .expect("complete");
        assert_eq!(&t.read("b", "k").await.expect("present")[..], b"A");
    }

    #[tokio::test]
    async fn test_should_abort_upload() {
        let t = TestStore::new();
        let upload_id = generate_upload_id();
        t.store
            .initiate_upload("b", "k", &upload_id, &MetadataMap::new())
            .await
            .expect("initiate");
        t.store
            .put_part("b", &upload_id, 1, ObjectContent::from("A"))
            .await
            .expect("put_part");

        assert!(t.store.abort_upload("b", &upload_id).await.expect("abort"));
        assert!(!t.store.abort_upload("b", &upload_id).await.expect("abort again"));

        let err = t
            .store
            .put_part("b", &upload_id, 2, ObjectContent::from("B"))
            .await
            .expect_err("aborted upload");
        assert!(matches!(err, StoreError::NoSuchUpload { .. }));
    }

    #[tokio::test]
    async fn test_should_reject_unknown_upload_id() {
        let t = TestStore::new();
        let err = t
            .store
            .put_object_multipart("b", &generate_upload_id(), &[1])
            .await
            .expect_err("unknown upload");
        assert!(matches!(err, StoreError::NoSuchUpload { .. }));

        let err = t
            .store
            .list_parts("b", "../escape")
            .await
            .expect_err("unsafe upload id");
        assert!(matches!(err, StoreError::InvalidUploadId { .. }));
    }
}
